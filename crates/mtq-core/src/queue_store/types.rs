//! Types used by the queue store.

use serde::Serialize;

use crate::task::{TaskKey, TaskStatus};

/// Full task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub key: TaskKey,
    pub status: TaskStatus,
    pub priority: i64,
    pub max_retries: u32,
    /// Failures recorded so far (`current_retries` column).
    pub retry_count: u32,
    /// Unix ms; the task is not eligible before this instant.
    pub scheduled_at: i64,
    /// Unix ms of the latest lease.
    pub processed_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Row of the `retry_queue` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryCandidate {
    pub key: TaskKey,
    pub priority: i64,
    pub max_retries: u32,
    pub retry_count: u32,
    pub scheduled_at: i64,
    pub last_error: Option<String>,
}

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn get(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Processing => self.processing,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Skipped => self.skipped,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    pub(crate) fn add(&mut self, status: TaskStatus, n: u64) {
        match status {
            TaskStatus::Pending => self.pending += n,
            TaskStatus::Processing => self.processing += n,
            TaskStatus::Completed => self.completed += n,
            TaskStatus::Failed => self.failed += n,
            TaskStatus::Skipped => self.skipped += n,
            TaskStatus::Cancelled => self.cancelled += n,
        }
    }

    pub fn total(&self) -> u64 {
        TaskStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// Pending or processing: work that may still produce an outcome.
    pub fn outstanding(&self) -> u64 {
        self.pending + self.processing
    }
}

/// Result of an explicit operator retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOutcome {
    /// A terminal task was reset to pending with a fresh budget.
    Requeued,
    /// The task is already pending or processing; nothing changed.
    AlreadyQueued,
    NotFound,
}
