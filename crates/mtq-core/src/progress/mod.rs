//! Live transfer progress: per-task counters, coalesced reporting and the
//! overall snapshot (percentage, speed, ETA).

mod active;
mod aggregate;
mod reporter;
mod throttle;

pub use active::{ActiveTransfer, TaskProgress};
pub use aggregate::{AggregateSnapshot, ProgressAggregator};
pub use reporter::ProgressReporter;
pub use throttle::ProgressThrottler;
