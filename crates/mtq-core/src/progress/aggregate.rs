//! Engine-owned progress map and the overall snapshot derived from it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use super::active::{ActiveTransfer, TaskProgress};
use crate::control::RunState;
use crate::task::{TaskKey, TaskStatus};

/// Point-in-time view of the whole batch. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Tasks currently PROCESSING.
    pub active: usize,
    /// Tasks in the current batch.
    pub total: u64,
    pub completed_count: u64,
    /// Tasks that reached any terminal status in this batch.
    pub finished_count: u64,
    /// In [0, 100].
    pub overall_percentage: f64,
    /// Bytes per second across active transfers.
    pub overall_speed: f64,
    pub eta_secs: Option<f64>,
    pub run_state: RunState,
    pub per_task: Vec<TaskProgress>,
}

#[derive(Default)]
struct State {
    active: HashMap<TaskKey, ActiveTransfer>,
    total: u64,
    completed: u64,
    finished: u64,
}

/// Live map of active transfers plus incremental batch counters.
pub struct ProgressAggregator {
    state: Mutex<State>,
    byte_weight: f64,
}

impl ProgressAggregator {
    /// `byte_weight` blends byte-weighted (1.0) and per-task average (0.0)
    /// progress of active transfers.
    pub fn new(byte_weight: f64) -> Self {
        let byte_weight = if byte_weight.is_finite() {
            byte_weight.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self {
            state: Mutex::new(State::default()),
            byte_weight,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking a leased task.
    pub fn begin(&self, key: TaskKey) {
        self.lock().active.insert(key, ActiveTransfer::new(key));
    }

    /// Publish a progress sample. Ignored for tasks that are not active.
    pub fn update(&self, key: TaskKey, downloaded: u64, total: u64, speed: f64) {
        let now = Instant::now();
        if let Some(t) = self.lock().active.get_mut(&key) {
            t.apply(downloaded, total, speed, now);
        }
    }

    pub fn set_display_name(&self, key: TaskKey, name: String) {
        if let Some(t) = self.lock().active.get_mut(&key) {
            t.display_name = Some(name);
        }
    }

    /// Stop tracking a task that left PROCESSING, counting `outcome` (if
    /// terminal) under the same lock. Returns its last state.
    pub fn finish(&self, key: TaskKey, outcome: Option<TaskStatus>) -> Option<ActiveTransfer> {
        let mut s = self.lock();
        if let Some(status) = outcome.filter(|st| st.is_terminal()) {
            s.finished += 1;
            if status == TaskStatus::Completed {
                s.completed += 1;
            }
        }
        s.active.remove(&key)
    }

    /// Grow the batch by `n` newly queued tasks.
    pub fn add_to_batch(&self, n: u64) {
        self.lock().total += n;
    }

    /// Start a new batch of `total` tasks with no outcomes yet.
    pub fn reset_batch(&self, total: u64) {
        let mut s = self.lock();
        s.total = total;
        s.completed = 0;
        s.finished = 0;
    }

    /// Count `n` queued tasks cancelled without ever running.
    pub fn record_cancelled(&self, n: u64) {
        self.lock().finished += n;
    }

    /// Derive the overall snapshot. O(active).
    pub fn snapshot(&self, run_state: RunState) -> AggregateSnapshot {
        let s = self.lock();

        let mut sized = 0usize;
        let mut sum_done = 0u64;
        let mut sum_total = 0u64;
        let mut sum_fraction = 0.0f64;
        let mut speed = 0.0f64;
        let mut per_task = Vec::with_capacity(s.active.len());
        for t in s.active.values() {
            speed += t.speed;
            if t.has_size() {
                sized += 1;
                sum_done += t.downloaded_bytes.min(t.total_bytes);
                sum_total += t.total_bytes;
                sum_fraction += t.fraction();
            }
            per_task.push(t.to_progress());
        }
        per_task.sort_by_key(|p| p.key);

        let active_fraction = if sized == 0 {
            0.0
        } else {
            let byte_fraction = sum_done as f64 / sum_total as f64;
            let task_fraction = sum_fraction / sized as f64;
            self.byte_weight * byte_fraction + (1.0 - self.byte_weight) * task_fraction
        };

        // Never smaller than what already finished plus what is in flight.
        let total = s.total.max(s.finished + s.active.len() as u64);
        let overall_percentage = if total == 0 {
            0.0
        } else {
            let done = s.finished as f64 + sized as f64 * active_fraction;
            (100.0 * done / total as f64).clamp(0.0, 100.0)
        };

        let remaining = sum_total.saturating_sub(sum_done);
        let eta_secs = if speed > 0.0 {
            Some(remaining as f64 / speed)
        } else {
            None
        };

        AggregateSnapshot {
            active: s.active.len(),
            total,
            completed_count: s.completed,
            finished_count: s.finished,
            overall_percentage,
            overall_speed: speed,
            eta_secs,
            run_state,
            per_task,
        }
    }
}
