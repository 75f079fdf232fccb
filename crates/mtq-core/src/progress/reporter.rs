//! Progress callback handed to the transfer collaborator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::aggregate::ProgressAggregator;
use super::throttle::ProgressThrottler;
use crate::task::TaskKey;

/// Coalescing, non-blocking progress sink for one executing task.
///
/// `report` never waits: it records activity for stall detection and only
/// publishes into the shared aggregator once per throttle interval. Its
/// return value tells the collaborator whether to keep going.
pub struct ProgressReporter {
    key: TaskKey,
    aggregator: Arc<ProgressAggregator>,
    throttle: ProgressThrottler,
    abort: Arc<AtomicBool>,
    started: Instant,
    /// Millis since `started` of the last byte progress.
    last_activity_ms: AtomicU64,
    last_bytes: AtomicU64,
}

impl ProgressReporter {
    pub fn new(
        key: TaskKey,
        aggregator: Arc<ProgressAggregator>,
        abort: Arc<AtomicBool>,
        interval: Duration,
    ) -> Self {
        Self {
            key,
            aggregator,
            throttle: ProgressThrottler::new(interval),
            abort,
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            last_bytes: AtomicU64::new(0),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Report `downloaded` of `total` bytes (0 = unknown) at `speed` bytes/s
    /// (0 = let the aggregator derive it). Returns false once the task should stop.
    pub fn report(&self, downloaded: u64, total: u64, speed: f64) -> bool {
        if downloaded > self.last_bytes.fetch_max(downloaded, Ordering::Relaxed) {
            self.last_activity_ms
                .store(self.elapsed_ms(), Ordering::Relaxed);
        }
        if self.throttle.should_emit() {
            self.aggregator.update(self.key, downloaded, total, speed);
        }
        !self.is_aborted()
    }

    /// Final sample, published regardless of the throttle.
    pub fn flush(&self, downloaded: u64, total: u64) {
        self.throttle.force_emit();
        self.aggregator.update(self.key, downloaded, total, 0.0);
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        self.aggregator.set_display_name(self.key, name.into());
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Time since the last byte progress (or since the start, if none yet).
    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }
}
