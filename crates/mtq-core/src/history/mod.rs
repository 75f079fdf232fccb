//! Append-only record of terminal task outcomes plus daily rollups.
//!
//! Every `record` inserts one immutable `download_history` row and folds it
//! into `download_stats` (per UTC day and collection) in the same transaction.

mod types;

use chrono::DateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::queue_store::{unix_timestamp_ms, QueueStore, StoreResult};
use crate::task::{TaskKey, TaskStatus};

pub use types::{DailyStats, HistoryEntry, HistoryFilter, HistoryPage, HistoryRecord, MAX_PAGE_SIZE};

/// Writes and queries task history on the queue database.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: QueueStore,
}

/// UTC calendar day of a Unix ms timestamp.
fn day_of(ts_ms: i64) -> String {
    DateTime::from_timestamp_millis(ts_ms)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

fn non_negative(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn record_from_row(row: &SqliteRow) -> Result<HistoryRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(HistoryRecord {
        id: row.try_get("id")?,
        key: TaskKey::new(row.try_get("collection_id")?, row.try_get("item_id")?),
        status: status
            .parse::<TaskStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        file_size: non_negative(row.try_get("file_size")?),
        error: row.try_get("error_message")?,
        timestamp: row.try_get("timestamp")?,
    })
}

impl HistoryRecorder {
    pub fn new(store: QueueStore) -> Self {
        Self { store }
    }

    /// Append a terminal outcome. Returns the new row id.
    pub async fn record(&self, entry: &HistoryEntry) -> StoreResult<i64> {
        self.record_at(entry, unix_timestamp_ms()).await
    }

    pub(crate) async fn record_at(&self, entry: &HistoryEntry, ts_ms: i64) -> StoreResult<i64> {
        let key = entry.key;
        let status = entry.status.as_str();
        let error = entry.error.as_deref();
        let size = i64::try_from(entry.file_size).unwrap_or(i64::MAX);
        let (success, fail, skip) = match entry.status {
            TaskStatus::Completed => (1i64, 0i64, 0i64),
            TaskStatus::Failed => (0, 1, 0),
            TaskStatus::Skipped | TaskStatus::Cancelled => (0, 0, 1),
            TaskStatus::Pending | TaskStatus::Processing => (0, 0, 0),
        };
        let date = day_of(ts_ms);
        let date = date.as_str();
        let store = &self.store;

        store
            .with_retry("record_history", move || async move {
                let mut tx = store.pool.begin().await?;
                let id = sqlx::query(
                    r#"
                    INSERT INTO download_history (
                        collection_id, item_id, status, file_size, error_message, timestamp
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .bind(key.collection_id)
                .bind(key.item_id)
                .bind(status)
                .bind(size)
                .bind(error)
                .bind(ts_ms)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();

                sqlx::query(
                    r#"
                    INSERT INTO download_stats (
                        date, collection_id, success_count, fail_count, skip_count, total_bytes
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT (date, collection_id) DO UPDATE SET
                        success_count = success_count + excluded.success_count,
                        fail_count = fail_count + excluded.fail_count,
                        skip_count = skip_count + excluded.skip_count,
                        total_bytes = total_bytes + excluded.total_bytes
                    "#,
                )
                .bind(date)
                .bind(key.collection_id)
                .bind(success)
                .bind(fail)
                .bind(skip)
                .bind(size)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok::<_, sqlx::Error>(id)
            })
            .await
    }

    /// Page through history, newest first.
    pub async fn query(&self, filter: HistoryFilter) -> StoreResult<HistoryPage> {
        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = i64::from(page - 1) * i64::from(page_size);
        let collection = filter.collection_id;
        let status = filter.status.map(TaskStatus::as_str);
        let store = &self.store;

        let (rows, total_rows) = store
            .with_retry("query_history", move || async move {
                let total: i64 = sqlx::query(
                    r#"
                    SELECT COUNT(*) AS n FROM download_history
                    WHERE (?1 IS NULL OR collection_id = ?1)
                      AND (?2 IS NULL OR status = ?2)
                    "#,
                )
                .bind(collection)
                .bind(status)
                .fetch_one(&store.pool)
                .await?
                .try_get("n")?;

                let rows = sqlx::query(
                    r#"
                    SELECT id, collection_id, item_id, status, file_size, error_message, timestamp
                    FROM download_history
                    WHERE (?1 IS NULL OR collection_id = ?1)
                      AND (?2 IS NULL OR status = ?2)
                    ORDER BY timestamp DESC, id DESC
                    LIMIT ?3 OFFSET ?4
                    "#,
                )
                .bind(collection)
                .bind(status)
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(&store.pool)
                .await?;
                let rows = rows
                    .iter()
                    .map(record_from_row)
                    .collect::<Result<Vec<_>, sqlx::Error>>()?;
                Ok::<_, sqlx::Error>((rows, non_negative(total)))
            })
            .await?;

        Ok(HistoryPage {
            rows,
            page,
            page_size,
            total_rows,
            total_pages: total_rows.div_ceil(u64::from(page_size)),
        })
    }

    /// Daily rollups, newest day first, optionally for one collection.
    pub async fn daily_stats(&self, collection_id: Option<i64>) -> StoreResult<Vec<DailyStats>> {
        let store = &self.store;
        store
            .with_retry("daily_stats", move || async move {
                let rows = sqlx::query(
                    r#"
                    SELECT date, collection_id, success_count, fail_count, skip_count, total_bytes
                    FROM download_stats
                    WHERE (?1 IS NULL OR collection_id = ?1)
                    ORDER BY date DESC, collection_id ASC
                    "#,
                )
                .bind(collection_id)
                .fetch_all(&store.pool)
                .await?;
                rows.iter()
                    .map(|row| -> Result<DailyStats, sqlx::Error> {
                        Ok(DailyStats {
                            date: row.try_get("date")?,
                            collection_id: row.try_get("collection_id")?,
                            success_count: non_negative(row.try_get("success_count")?),
                            fail_count: non_negative(row.try_get("fail_count")?),
                            skip_count: non_negative(row.try_get("skip_count")?),
                            total_bytes: non_negative(row.try_get("total_bytes")?),
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()
            })
            .await
    }
}
