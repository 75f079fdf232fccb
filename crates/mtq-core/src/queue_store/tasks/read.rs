//! Task read operations: get, list, counts and the retry view.

use sqlx::Row;

use super::super::db::QueueStore;
use super::super::error::StoreResult;
use super::super::types::{RetryCandidate, StatusCounts, TaskRecord};
use super::{count_from_row, status_from_row, task_from_row};
use crate::task::{TaskKey, TaskStatus};

impl QueueStore {
    /// Fetch a single task row.
    pub async fn get_task(&self, key: TaskKey) -> StoreResult<Option<TaskRecord>> {
        self.with_retry("get_task", move || async move {
            let row = sqlx::query(
                r#"
                SELECT collection_id, item_id, status, priority, max_retries,
                       current_retries, scheduled_at, processed_at, error_message
                FROM download_queue
                WHERE collection_id = ?1 AND item_id = ?2
                "#,
            )
            .bind(key.collection_id)
            .bind(key.item_id)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(task_from_row).transpose()
        })
        .await
    }

    /// List tasks, optionally filtered by status, in dequeue order.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<TaskRecord>> {
        let status = status.map(TaskStatus::as_str);
        self.with_retry("list_tasks", move || async move {
            let rows = sqlx::query(
                r#"
                SELECT collection_id, item_id, status, priority, max_retries,
                       current_retries, scheduled_at, processed_at, error_message
                FROM download_queue
                WHERE (?1 IS NULL OR status = ?1)
                ORDER BY priority DESC, scheduled_at ASC, rowid ASC
                "#,
            )
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(task_from_row).collect::<Result<Vec<_>, sqlx::Error>>()
        })
        .await
    }

    /// Number of tasks per status.
    pub async fn counts(&self) -> StoreResult<StatusCounts> {
        self.with_retry("counts", move || async move {
            let rows = sqlx::query(
                r#"
                SELECT status, COUNT(*) AS n
                FROM download_queue
                GROUP BY status
                "#,
            )
            .fetch_all(&self.pool)
            .await?;
            let mut counts = StatusCounts::default();
            for row in &rows {
                let status = status_from_row(row, "status")?;
                let n: i64 = row.try_get("n")?;
                counts.add(status, n.max(0) as u64);
            }
            Ok::<_, sqlx::Error>(counts)
        })
        .await
    }

    /// Rows eligible for (re)try with their latest known error, highest priority first.
    pub async fn pending_retries(&self) -> StoreResult<Vec<RetryCandidate>> {
        self.with_retry("pending_retries", move || async move {
            let rows = sqlx::query(
                r#"
                SELECT collection_id, item_id, priority, max_retries,
                       current_retries, scheduled_at, last_error
                FROM retry_queue
                ORDER BY priority DESC, scheduled_at ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await?;
            rows.iter()
                .map(|row| -> Result<RetryCandidate, sqlx::Error> {
                    Ok(RetryCandidate {
                        key: TaskKey::new(row.try_get("collection_id")?, row.try_get("item_id")?),
                        priority: row.try_get("priority")?,
                        max_retries: count_from_row(row, "max_retries")?,
                        retry_count: count_from_row(row, "current_retries")?,
                        scheduled_at: row.try_get("scheduled_at")?,
                        last_error: row.try_get("last_error")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
        })
        .await
    }
}
