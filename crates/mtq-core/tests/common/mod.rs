pub mod stub_transfer;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mtq_core::config::EngineSettings;
use mtq_core::engine::Engine;
use mtq_core::queue_store::QueueStore;
use mtq_core::retry::{Backoff, RetryPolicy};
use mtq_core::transfer::Transfer;

/// Fast settings: short intervals, no publication throttle, retries without delay.
pub fn settings(workers: usize) -> EngineSettings {
    EngineSettings {
        workers,
        default_priority: 0,
        default_max_retries: 3,
        stall_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(10),
        checkpoint_interval: Duration::from_millis(10),
        progress_interval: Duration::ZERO,
        byte_weight: 1.0,
    }
}

pub fn no_delay_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff: Backoff::Exponential,
    }
}

pub async fn engine_with(transfer: Arc<dyn Transfer>, settings: EngineSettings) -> Engine {
    let store = QueueStore::open_memory().await.unwrap();
    Engine::new(store, transfer, settings, no_delay_policy())
}

/// Poll `cond` until it holds; panics after 5s.
pub async fn wait_for<F, Fut>(what: &str, mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
