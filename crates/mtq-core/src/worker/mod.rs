//! Fixed-size pool of workers, each looping lease -> execute -> resolve.
//!
//! The lease is the only point of mutual exclusion between workers. A worker
//! that finds the run paused, the queue empty or the store unavailable idles
//! until the run state changes, the pool shuts down, or the poll interval passes.

mod execute;
mod resolve;

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::control::RunState;
use crate::engine::Engine;
use crate::queue_store::TaskRecord;

use self::execute::execute;
use self::resolve::resolve;

/// When workers stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// Serve the queue until `shutdown()`.
    Continuous,
    /// Exit once nothing is pending or processing, or the run is cancelled.
    Drain,
}

/// Handle to the running workers.
pub struct WorkerPool {
    workers: JoinSet<()>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `engine.settings().workers` workers on the current runtime.
    pub fn spawn(engine: Engine, mode: PoolMode) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        let size = engine.settings().workers.max(1);
        for id in 0..size {
            let engine = engine.clone();
            let shutdown_rx = shutdown_rx.clone();
            workers.spawn(async move { worker_loop(id, engine, mode, shutdown_rx).await });
        }
        tracing::debug!(workers = size, ?mode, "worker pool started");
        Self { workers, shutdown }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Ask workers to stop after their current task.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for every worker to exit.
    pub async fn join(mut self) {
        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                tracing::error!("worker task join: {}", e);
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    engine: Engine,
    mode: PoolMode,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll = engine.settings().poll_interval;
    let mut state_rx = engine.control_plane().subscribe();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let state = *state_rx.borrow_and_update();
        match state {
            RunState::Running => {}
            RunState::Cancelled if mode == PoolMode::Drain => break,
            RunState::Paused | RunState::Cancelled => {
                idle(poll, &mut state_rx, &mut shutdown).await;
                continue;
            }
        }

        let task = match engine.lease_next(1).await {
            Ok(leased) => leased.into_iter().next(),
            Err(e) if e.is_unavailable() => {
                tracing::debug!(worker = id, "storage busy, lease skipped: {}", e);
                idle(poll, &mut state_rx, &mut shutdown).await;
                continue;
            }
            Err(e) => {
                tracing::warn!(worker = id, "lease failed: {}", e);
                idle(poll, &mut state_rx, &mut shutdown).await;
                continue;
            }
        };

        let Some(task) = task else {
            if mode == PoolMode::Drain {
                match engine.counts().await {
                    Ok(counts) if counts.outstanding() == 0 => break,
                    Ok(_) => {}
                    Err(e) => tracing::warn!(worker = id, "count failed: {}", e),
                }
            }
            idle(poll, &mut state_rx, &mut shutdown).await;
            continue;
        };

        run_task(id, &engine, task, &mut shutdown).await;
    }
    tracing::debug!(worker = id, "worker exiting");
}

async fn run_task(
    id: usize,
    engine: &Engine,
    task: TaskRecord,
    shutdown: &mut watch::Receiver<bool>,
) {
    tracing::debug!(
        worker = id,
        collection_id = task.key.collection_id,
        item_id = task.key.item_id,
        attempt = task.retry_count + 1,
        "task leased"
    );
    let execution = execute(engine, &task).await;
    resolve(engine, &task, execution, shutdown).await;
}

async fn idle(
    poll: Duration,
    state_rx: &mut watch::Receiver<RunState>,
    shutdown: &mut watch::Receiver<bool>,
) {
    tokio::select! {
        _ = state_rx.changed() => {}
        _ = shutdown.changed() => {}
        _ = tokio::time::sleep(poll) => {}
    }
}
