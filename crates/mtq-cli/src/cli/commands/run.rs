//! `mtq run` – drain the queue with the simulated transfer and print progress.

use anyhow::Result;
use mtq_core::config::MtqConfig;
use mtq_core::control::ControlCommand;
use mtq_core::engine::Engine;
use mtq_core::progress::AggregateSnapshot;
use mtq_core::queue_store::QueueStore;
use mtq_core::transfer::SimulatedTransfer;
use mtq_core::worker::{PoolMode, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

use super::format_bytes;
use crate::cli::control_socket;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub jobs: Option<usize>,
    pub item_size: u64,
    pub rate: u64,
}

fn progress_line(s: &AggregateSnapshot) -> String {
    let eta = s
        .eta_secs
        .map(|secs| format!("{:.0}s", secs))
        .unwrap_or_else(|| "?".to_string());
    format!(
        "  {}/{} done ({:.1}%)  {} active  {}/s  ETA {}  [{}]",
        s.finished_count,
        s.total,
        s.overall_percentage,
        s.active,
        format_bytes(s.overall_speed as u64),
        eta,
        s.run_state
    )
}

pub async fn run_queue(store: QueueStore, cfg: &MtqConfig, args: &RunArgs) -> Result<()> {
    let mut cfg = cfg.clone();
    if let Some(jobs) = args.jobs {
        cfg.max_parallel_transfers = jobs;
    }
    let transfer = Arc::new(SimulatedTransfer::new(args.item_size, args.rate));
    let engine = Engine::from_config(store, transfer, &cfg)?;

    // Recovery below returns every PROCESSING row to the queue, which is only
    // sound while no other run owns leases in this database.
    let socket_path = mtq_core::control::default_control_socket_path().ok();
    if let Some(path) = &socket_path {
        control_socket::ensure_no_live_run(path).await?;
    }
    let listener = socket_path.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(engine.clone(), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket unavailable: {}", e);
                None
            }
        }
    });
    let stop_listener = move || {
        if let Some(handle) = listener {
            handle.abort();
        }
        if let Some(path) = &socket_path {
            let _ = std::fs::remove_file(path);
        }
    };

    let recovered = match engine.start_run().await {
        Ok(n) => n,
        Err(e) => {
            stop_listener();
            return Err(e.into());
        }
    };
    if recovered > 0 {
        println!("Recovered {} task(s) from a previous run", recovered);
    }
    if engine.snapshot().total == 0 {
        stop_listener();
        println!("No pending tasks.");
        return Ok(());
    }

    let printer = tokio::spawn({
        let engine = engine.clone();
        async move {
            let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
            loop {
                ticker.tick().await;
                println!("{}", progress_line(&engine.snapshot()));
            }
        }
    });

    let pool = WorkerPool::spawn(engine.clone(), PoolMode::Drain);
    let join = pool.join();
    tokio::pin!(join);
    tokio::select! {
        _ = &mut join => {}
        res = tokio::signal::ctrl_c() => {
            if res.is_ok() {
                println!("Interrupted; cancelling run");
                if let Err(e) = engine.control(ControlCommand::Cancel).await {
                    tracing::warn!("cancel on interrupt: {}", e);
                }
            }
            (&mut join).await;
        }
    }

    printer.abort();
    stop_listener();

    let snapshot = engine.snapshot();
    println!("{}", progress_line(&snapshot));
    let counts = engine.counts().await?;
    println!(
        "Run finished: {} completed, {} failed, {} skipped, {} cancelled, {} pending",
        counts.completed, counts.failed, counts.skipped, counts.cancelled, counts.pending
    );
    tracing::info!(
        completed = snapshot.completed_count,
        finished = snapshot.finished_count,
        "run finished"
    );
    Ok(())
}
