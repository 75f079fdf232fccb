//! `mtq history` – paged terminal outcomes.

use anyhow::Result;
use mtq_core::history::{HistoryFilter, HistoryRecorder};
use mtq_core::queue_store::QueueStore;
use mtq_core::task::TaskStatus;

use super::{format_bytes, format_ts};

#[derive(Debug, Clone)]
pub struct HistoryArgs {
    pub collection: Option<i64>,
    pub status: Option<TaskStatus>,
    pub page: u32,
    pub page_size: u32,
}

pub async fn run_history(store: &QueueStore, args: &HistoryArgs) -> Result<()> {
    let history = HistoryRecorder::new(store.clone());
    let page = history
        .query(HistoryFilter {
            collection_id: args.collection,
            status: args.status,
            page: args.page,
            page_size: args.page_size,
        })
        .await?;
    if page.rows.is_empty() {
        println!("No history.");
        return Ok(());
    }
    println!(
        "{:<20} {:<22} {:<10} {:>10}  {}",
        "TIME", "TASK", "STATUS", "SIZE", "ERROR"
    );
    for r in &page.rows {
        println!(
            "{:<20} {:<22} {:<10} {:>10}  {}",
            format_ts(r.timestamp),
            r.key.to_string(),
            r.status.as_str(),
            format_bytes(r.file_size),
            r.error.as_deref().unwrap_or("-")
        );
    }
    println!(
        "page {}/{} ({} row(s))",
        page.page, page.total_pages, page.total_rows
    );
    Ok(())
}
