use serde::{Deserialize, Serialize};
use std::time::Duration;

/// High-level classification of a task failure for retry purposes.
///
/// Callers map collaborator errors into these kinds via [`super::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network blip, dropped connection, server hiccup.
    Transient,
    /// No byte progress within the stall timeout.
    Stalled,
    /// The remote service asked us to wait this long before trying again.
    RateLimited(Duration),
    /// Item type cannot be transferred; never retried.
    Unsupported,
    /// Session or permission revoked; never retried.
    Unauthorized,
    /// Source item no longer exists; never retried.
    NotFound,
}

impl ErrorKind {
    /// Permanent kinds are terminal regardless of remaining budget.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            ErrorKind::Unsupported | ErrorKind::Unauthorized | ErrorKind::NotFound
        )
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; the task becomes terminal.
    NoRetry,
    /// Retry after the given backoff; the attempt counts against the budget.
    RetryAfter(Duration),
    /// Retry after a wait mandated by the remote service; the budget is not charged.
    WaitFor(Duration),
}

/// Growth of the backoff delay with the number of failures so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// base * n
    Linear,
    /// base * 2^(n-1)
    #[default]
    Exponential,
}

/// Backoff policy with a ceiling. Built from `MtqConfig::retry_policy()`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Decide what happens after a failure.
    ///
    /// `retry_count` is the number of failures recorded before this one and
    /// `max_retries` the task's attempt budget. A charged failure that brings
    /// the count to `max_retries` is terminal.
    pub fn should_retry(&self, retry_count: u32, max_retries: u32, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::Unsupported | ErrorKind::Unauthorized | ErrorKind::NotFound => {
                RetryDecision::NoRetry
            }
            ErrorKind::RateLimited(wait) => RetryDecision::WaitFor(wait),
            ErrorKind::Transient | ErrorKind::Stalled => {
                let failures = retry_count.saturating_add(1);
                if failures >= max_retries {
                    return RetryDecision::NoRetry;
                }
                RetryDecision::RetryAfter(self.delay_for(failures))
            }
        }
    }

    /// Backoff delay after the n-th failure (1-based), capped at `max_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let n = failures.max(1);
        let raw = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(n),
            Backoff::Exponential => self.base_delay.saturating_mul(1u32 << (n - 1).min(16)),
        };
        raw.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_kinds_never_retry() {
        let p = RetryPolicy::default();
        for kind in [ErrorKind::Unsupported, ErrorKind::Unauthorized, ErrorKind::NotFound] {
            assert!(kind.is_permanent());
            assert_eq!(p.should_retry(0, 10, kind), RetryDecision::NoRetry);
        }
    }

    #[test]
    fn rate_limit_overrides_backoff_and_ignores_budget() {
        let p = RetryPolicy::default();
        let wait = Duration::from_secs(42);
        assert_eq!(
            p.should_retry(9, 3, ErrorKind::RateLimited(wait)),
            RetryDecision::WaitFor(wait)
        );
    }

    #[test]
    fn budget_exhausts_on_the_last_attempt() {
        let p = RetryPolicy::default();
        assert!(matches!(
            p.should_retry(0, 3, ErrorKind::Transient),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            p.should_retry(1, 3, ErrorKind::Stalled),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.should_retry(2, 3, ErrorKind::Transient), RetryDecision::NoRetry);
        assert_eq!(p.should_retry(0, 1, ErrorKind::Transient), RetryDecision::NoRetry);
    }

    #[test]
    fn exponential_backoff_grows_and_is_capped() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff: Backoff::Exponential,
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(10), Duration::from_secs(1));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn linear_backoff() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff: Backoff::Linear,
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(3), Duration::from_millis(300));
        assert_eq!(p.delay_for(4), Duration::from_millis(350));
    }
}
