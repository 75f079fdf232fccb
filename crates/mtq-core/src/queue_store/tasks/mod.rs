//! Task CRUD split into reads and writes; shared row decoding lives here.

mod read;
mod write;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::types::TaskRecord;
use crate::task::{TaskKey, TaskStatus};

pub(super) fn status_from_row(row: &SqliteRow, col: &str) -> Result<TaskStatus, sqlx::Error> {
    let s: String = row.try_get(col)?;
    s.parse::<TaskStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Counters are stored as INTEGER; negative values never occur but are clamped.
pub(super) fn count_from_row(row: &SqliteRow, col: &str) -> Result<u32, sqlx::Error> {
    let v: i64 = row.try_get(col)?;
    Ok(u32::try_from(v.max(0)).unwrap_or(u32::MAX))
}

/// Decode a row selected with the full task column list.
pub(super) fn task_from_row(row: &SqliteRow) -> Result<TaskRecord, sqlx::Error> {
    Ok(TaskRecord {
        key: TaskKey::new(row.try_get("collection_id")?, row.try_get("item_id")?),
        status: status_from_row(row, "status")?,
        priority: row.try_get("priority")?,
        max_retries: count_from_row(row, "max_retries")?,
        retry_count: count_from_row(row, "current_retries")?,
        scheduled_at: row.try_get("scheduled_at")?,
        processed_at: row.try_get("processed_at")?,
        last_error: row.try_get("error_message")?,
    })
}
