//! Per-task limit on how often a reporter publishes into the aggregator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free emission deadline, kept as millis since `origin`.
#[derive(Debug)]
pub struct ProgressThrottler {
    origin: Instant,
    interval_ms: u64,
    next_ms: AtomicU64,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            next_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// True at most once per interval; the first call always emits. When two
    /// callers race for the same slot only one of them wins it.
    pub fn should_emit(&self) -> bool {
        let now = self.now_ms();
        let next = self.next_ms.load(Ordering::Relaxed);
        if now < next {
            return false;
        }
        self.next_ms
            .compare_exchange(
                next,
                now.saturating_add(self.interval_ms),
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Record an unconditional emission; the next regular one waits a full interval.
    pub fn force_emit(&self) {
        self.next_ms
            .store(self.now_ms().saturating_add(self.interval_ms), Ordering::Relaxed);
    }
}
