//! `mtq retry <collection> <item>` – explicit operator retry.

use anyhow::{bail, Result};
use mtq_core::queue_store::{QueueStore, RetryOutcome};
use mtq_core::task::TaskKey;

pub async fn run_retry(store: &QueueStore, collection: i64, item: i64) -> Result<()> {
    let key = TaskKey::new(collection, item);
    match store.retry(key).await? {
        RetryOutcome::Requeued => println!("Requeued {}", key),
        RetryOutcome::AlreadyQueued => println!("{} is already queued", key),
        RetryOutcome::NotFound => bail!("task {} not found", key),
    }
    Ok(())
}
