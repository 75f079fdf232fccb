//! `mtq stats` – daily rollups.

use anyhow::Result;
use mtq_core::history::HistoryRecorder;
use mtq_core::queue_store::QueueStore;

use super::format_bytes;

pub async fn run_stats(store: &QueueStore, collection: Option<i64>) -> Result<()> {
    let stats = HistoryRecorder::new(store.clone())
        .daily_stats(collection)
        .await?;
    if stats.is_empty() {
        println!("No statistics yet.");
        return Ok(());
    }
    println!(
        "{:<10} {:>14} {:>8} {:>8} {:>8} {:>10}",
        "DATE", "COLLECTION", "OK", "FAILED", "SKIPPED", "BYTES"
    );
    for s in stats {
        println!(
            "{:<10} {:>14} {:>8} {:>8} {:>8} {:>10}",
            s.date,
            s.collection_id,
            s.success_count,
            s.fail_count,
            s.skip_count,
            format_bytes(s.total_bytes)
        );
    }
    Ok(())
}
