//! Per-task live transfer state.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::task::TaskKey;

/// Byte counters of one PROCESSING task. Owned by the aggregator, written
/// only through the reporter of the worker that leased the task.
#[derive(Debug, Clone)]
pub struct ActiveTransfer {
    pub key: TaskKey,
    pub display_name: Option<String>,
    pub downloaded_bytes: u64,
    /// 0 while the size is unknown.
    pub total_bytes: u64,
    /// Bytes per second.
    pub speed: f64,
    last_sample: Option<(Instant, u64)>,
}

impl ActiveTransfer {
    pub fn new(key: TaskKey) -> Self {
        Self {
            key,
            display_name: None,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed: 0.0,
            last_sample: None,
        }
    }

    /// Apply a progress sample. Bytes never go backwards; a zero reported
    /// speed is replaced by the rate since the previous sample.
    pub fn apply(&mut self, downloaded: u64, total: u64, reported_speed: f64, now: Instant) {
        self.downloaded_bytes = self.downloaded_bytes.max(downloaded);
        if total > 0 {
            self.total_bytes = total;
        }
        if reported_speed.is_finite() && reported_speed > 0.0 {
            self.speed = reported_speed;
        } else if let Some((at, bytes)) = self.last_sample {
            let secs = now.duration_since(at).as_secs_f64();
            if secs > 0.0 {
                self.speed = self.downloaded_bytes.saturating_sub(bytes) as f64 / secs;
            }
        }
        self.last_sample = Some((now, self.downloaded_bytes));
    }

    pub fn has_size(&self) -> bool {
        self.total_bytes > 0
    }

    /// Fraction complete in [0.0, 1.0]; 0 while the size is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0)
    }

    pub fn to_progress(&self) -> TaskProgress {
        TaskProgress {
            key: self.key,
            display_name: self.display_name.clone(),
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            speed: self.speed,
            percentage: self.fraction() * 100.0,
        }
    }
}

/// Read-only view of an active transfer inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub key: TaskKey,
    pub display_name: Option<String>,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed: f64,
    pub percentage: f64,
}
