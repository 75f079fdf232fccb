//! Scripted transfer collaborator for engine tests.
//!
//! Each key can be given a queue of outcomes returned on successive attempts;
//! once the script is exhausted the transfer reports half the bytes, waits on
//! the gate (if any) and completes. Tracks how many transfers run at once.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use mtq_core::progress::ProgressReporter;
use mtq_core::task::TaskKey;
use mtq_core::transfer::{Transfer, TransferItem, TransferOutcome};

pub struct StubTransfer {
    size: u64,
    scripts: Mutex<HashMap<TaskKey, VecDeque<TransferOutcome>>>,
    gate: Option<Arc<Semaphore>>,
    hang: bool,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

/// Decrements the active counter even when the transfer future is dropped.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubTransfer {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            scripts: Mutex::new(HashMap::new()),
            gate: None,
            hang: false,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Hold every transfer after its first progress report until the gate has permits.
    pub fn gated(size: u64) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut t = Self::new(size);
        t.gate = Some(Arc::clone(&gate));
        (t, gate)
    }

    /// Never report progress and never finish.
    pub fn hanging() -> Self {
        let mut t = Self::new(100);
        t.hang = true;
        t
    }

    pub fn script(self, key: TaskKey, outcomes: Vec<TransferOutcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(key, outcomes.into_iter().collect());
        self
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transfer for StubTransfer {
    async fn transfer(&self, item: &TransferItem, progress: &ProgressReporter) -> TransferOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&item.key)
            .and_then(|q| q.pop_front());
        if let Some(outcome) = scripted {
            return outcome;
        }
        if self.hang {
            std::future::pending::<()>().await;
        }

        progress.set_display_name(format!("item-{}", item.key.item_id));
        progress.report(self.size / 2, self.size, 1000.0);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        progress.report(self.size, self.size, 1000.0);
        TransferOutcome::Completed { size: self.size }
    }
}
