//! `mtq pending` – tasks waiting for a (re)try.

use anyhow::Result;
use mtq_core::queue_store::QueueStore;

use super::format_ts;

pub async fn run_pending(store: &QueueStore) -> Result<()> {
    let rows = store.pending_retries().await?;
    if rows.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }
    println!(
        "{:<22} {:>8} {:>8} {:<20} {}",
        "TASK", "PRIORITY", "RETRIES", "ELIGIBLE AT", "LAST ERROR"
    );
    for r in rows {
        println!(
            "{:<22} {:>8} {:>8} {:<20} {}",
            r.key.to_string(),
            r.priority,
            format!("{}/{}", r.retry_count, r.max_retries),
            format_ts(r.scheduled_at),
            r.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
