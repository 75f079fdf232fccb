//! Retry and backoff policy.
//!
//! This module encapsulates classification of transfer failures (transient,
//! rate limited, permanent) and the backoff decision so the worker pool and
//! the queue store share one policy.

mod classify;
mod policy;

pub use classify::classify;
pub use policy::{Backoff, ErrorKind, RetryDecision, RetryPolicy};
