//! Boundary to the remote media-transfer collaborator.
//!
//! The collaborator performs the byte transfer and owns authentication. The
//! engine hands it a [`TransferItem`] and a [`ProgressReporter`] and expects a
//! classified [`TransferOutcome`] back; it must never block the reporter.

mod simulated;

use async_trait::async_trait;
use std::time::Duration;

use crate::progress::ProgressReporter;
use crate::task::TaskKey;

pub use simulated::SimulatedTransfer;

/// Reason recorded when an item turns out to have no bytes.
pub const ZERO_SIZE_REASON: &str = "zero-size item";

/// What the collaborator is asked to transfer.
#[derive(Debug, Clone)]
pub struct TransferItem {
    pub key: TaskKey,
    /// Failures recorded for this task before this attempt.
    pub retry_count: u32,
    pub priority: i64,
}

/// Classified failure reported by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited: retry after {}s", .wait.as_secs())]
    RateLimited { wait: Duration },
    #[error("unsupported item: {0}")]
    Unsupported(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("item not found: {0}")]
    NotFound(String),
}

/// Result of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All bytes transferred.
    Completed { size: u64 },
    Failed(TransferError),
    /// The collaborator declined the item (zero size, filtered type, already present).
    Skipped { reason: String },
}

/// The external transfer collaborator.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Transfer one item, reporting progress through `progress`.
    ///
    /// The returned future may be dropped at any await point when the run is
    /// cancelled or the task stalls.
    async fn transfer(&self, item: &TransferItem, progress: &ProgressReporter) -> TransferOutcome;
}
