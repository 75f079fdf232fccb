//! Simulated collaborator: produces bytes at a fixed rate without touching the network.
//!
//! Used by `mtq run` and by tests that need realistic progress streams.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::{Transfer, TransferItem, TransferOutcome, ZERO_SIZE_REASON};
use crate::progress::ProgressReporter;
use crate::task::TaskKey;

const TICK: Duration = Duration::from_millis(50);

/// Transfers `item_size` bytes per item at `bytes_per_sec`.
#[derive(Debug, Clone)]
pub struct SimulatedTransfer {
    item_size: u64,
    bytes_per_sec: u64,
    overrides: HashMap<TaskKey, u64>,
}

impl SimulatedTransfer {
    pub fn new(item_size: u64, bytes_per_sec: u64) -> Self {
        Self {
            item_size,
            bytes_per_sec: bytes_per_sec.max(1),
            overrides: HashMap::new(),
        }
    }

    /// Use a specific size for one item (0 makes the item skipped).
    pub fn with_size(mut self, key: TaskKey, size: u64) -> Self {
        self.overrides.insert(key, size);
        self
    }

    fn size_of(&self, key: &TaskKey) -> u64 {
        self.overrides.get(key).copied().unwrap_or(self.item_size)
    }
}

#[async_trait]
impl Transfer for SimulatedTransfer {
    async fn transfer(&self, item: &TransferItem, progress: &ProgressReporter) -> TransferOutcome {
        let total = self.size_of(&item.key);
        if total == 0 {
            return TransferOutcome::Skipped {
                reason: ZERO_SIZE_REASON.to_string(),
            };
        }
        progress.set_display_name(format!("item-{}.bin", item.key.item_id));

        let per_tick = ((self.bytes_per_sec as f64 * TICK.as_secs_f64()) as u64).max(1);
        let mut downloaded = 0u64;
        while downloaded < total {
            tokio::time::sleep(TICK).await;
            downloaded = (downloaded + per_tick).min(total);
            if !progress.report(downloaded, total, self.bytes_per_sec as f64) {
                return TransferOutcome::Skipped {
                    reason: "aborted".to_string(),
                };
            }
        }
        progress.flush(total, total);
        TransferOutcome::Completed { size: total }
    }
}
