//! `mtq status` – queue counts, plus live progress when a run is active.

use anyhow::Result;
use mtq_core::progress::AggregateSnapshot;
use mtq_core::queue_store::QueueStore;
use mtq_core::task::TaskStatus;

use super::format_bytes;
use crate::cli::control_socket;

async fn live_snapshot() -> Option<AggregateSnapshot> {
    let reply = control_socket::send_default("snapshot").await.ok()??;
    serde_json::from_str(&reply).ok()
}

pub async fn run_status(store: &QueueStore, json: bool) -> Result<()> {
    let counts = store.counts().await?;

    if json {
        let live = live_snapshot().await;
        let out = serde_json::json!({
            "counts": counts,
            "live": live,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if let Some(s) = live_snapshot().await {
        println!(
            "Run {}: {}/{} done ({:.1}%), {} active, {}/s",
            s.run_state,
            s.finished_count,
            s.total,
            s.overall_percentage,
            s.active,
            format_bytes(s.overall_speed as u64)
        );
    } else {
        println!("No active run.");
    }

    println!("{:<12} {}", "STATUS", "TASKS");
    for status in TaskStatus::ALL {
        println!("{:<12} {}", status.as_str(), counts.get(status));
    }

    let mut live = store.list_tasks(Some(TaskStatus::Processing)).await?;
    live.extend(store.list_tasks(Some(TaskStatus::Pending)).await?);
    if !live.is_empty() {
        println!();
        println!(
            "{:<22} {:<11} {:>8} {:>8}  {}",
            "TASK", "STATUS", "PRIORITY", "RETRIES", "LAST ERROR"
        );
        for t in live {
            println!(
                "{:<22} {:<11} {:>8} {:>8}  {}",
                t.key.to_string(),
                t.status.as_str(),
                t.priority,
                format!("{}/{}", t.retry_count, t.max_retries),
                t.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
