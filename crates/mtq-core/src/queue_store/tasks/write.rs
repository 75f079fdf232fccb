//! Task write operations: enqueue, lease, state transitions, reset.

use sqlx::{Row, SqliteConnection};
use std::time::Duration;

use super::super::db::{unix_timestamp_ms, QueueStore};
use super::super::error::StoreResult;
use super::super::types::{RetryOutcome, TaskRecord};
use super::task_from_row;
use crate::task::TaskKey;

/// Insert a pending row or refresh an existing one. Returns true if a row was created.
async fn upsert_task(
    conn: &mut SqliteConnection,
    key: TaskKey,
    priority: i64,
    max_retries: u32,
    reset: bool,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO download_queue (
            collection_id, item_id, priority, max_retries,
            current_retries, status, scheduled_at
        ) VALUES (?1, ?2, ?3, ?4, 0, 'pending', ?5)
        ON CONFLICT (collection_id, item_id) DO NOTHING
        "#,
    )
    .bind(key.collection_id)
    .bind(key.item_id)
    .bind(priority)
    .bind(i64::from(max_retries))
    .bind(now)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        == 1;
    if inserted {
        return Ok(true);
    }

    // A live task keeps at least one attempt beyond the failures it already
    // spent; otherwise it would stay pending without ever being leased.
    sqlx::query(
        r#"
        UPDATE download_queue
        SET priority = ?1,
            max_retries = MAX(?2, current_retries + 1)
        WHERE collection_id = ?3 AND item_id = ?4
          AND status IN ('pending', 'processing')
        "#,
    )
    .bind(priority)
    .bind(i64::from(max_retries))
    .bind(key.collection_id)
    .bind(key.item_id)
    .execute(&mut *conn)
    .await?;

    if reset {
        sqlx::query(
            r#"
            UPDATE download_queue
            SET status = 'pending',
                priority = ?1,
                max_retries = ?2,
                current_retries = 0,
                scheduled_at = ?3,
                processed_at = NULL,
                error_message = NULL
            WHERE collection_id = ?4 AND item_id = ?5
              AND status IN ('completed', 'failed', 'skipped', 'cancelled')
            "#,
        )
        .bind(priority)
        .bind(i64::from(max_retries))
        .bind(now)
        .bind(key.collection_id)
        .bind(key.item_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(false)
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl QueueStore {
    /// Add a task as pending.
    ///
    /// An existing non-terminal task gets the new priority/budget (never less
    /// than one attempt past its recorded failures); an existing
    /// terminal task is left alone unless `reset` is set, which re-queues it
    /// with a fresh budget. Returns true if a new row was created.
    pub async fn enqueue(
        &self,
        key: TaskKey,
        priority: i64,
        max_retries: u32,
        reset: bool,
    ) -> StoreResult<bool> {
        let max_retries = max_retries.max(1);
        self.with_retry("enqueue", move || async move {
            let now = unix_timestamp_ms();
            let mut tx = self.pool.begin().await?;
            let created = upsert_task(&mut *tx, key, priority, max_retries, reset, now).await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(created)
        })
        .await
    }

    /// Bulk form of [`Self::enqueue`] for one collection, in a single transaction.
    /// Returns the number of newly created rows.
    pub async fn enqueue_many(
        &self,
        collection_id: i64,
        item_ids: &[i64],
        priority: i64,
        max_retries: u32,
    ) -> StoreResult<u64> {
        let max_retries = max_retries.max(1);
        self.with_retry("enqueue_many", move || async move {
            let now = unix_timestamp_ms();
            let mut tx = self.pool.begin().await?;
            let mut added = 0u64;
            for &item_id in item_ids {
                let key = TaskKey::new(collection_id, item_id);
                if upsert_task(&mut *tx, key, priority, max_retries, false, now).await? {
                    added += 1;
                }
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(added)
        })
        .await
    }

    /// Atomically lease up to `limit` eligible pending tasks, highest priority
    /// first, moving them to processing.
    ///
    /// Selection and transition happen in one UPDATE that re-checks
    /// `status = 'pending'`, so concurrent callers never lease the same key.
    pub async fn lease_next(&self, limit: usize) -> StoreResult<Vec<TaskRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut leased = self
            .with_retry("lease_next", move || async move {
                let now = unix_timestamp_ms();
                let rows = sqlx::query(
                    r#"
                    UPDATE download_queue
                    SET status = 'processing',
                        processed_at = ?1
                    WHERE rowid IN (
                        SELECT rowid FROM download_queue
                        WHERE status = 'pending'
                          AND current_retries < max_retries
                          AND scheduled_at <= ?1
                        ORDER BY priority DESC, scheduled_at ASC, rowid ASC
                        LIMIT ?2
                    )
                    AND status = 'pending'
                    RETURNING collection_id, item_id, status, priority, max_retries,
                              current_retries, scheduled_at, processed_at, error_message
                    "#,
                )
                .bind(now)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
                rows.iter()
                    .map(task_from_row)
                    .collect::<Result<Vec<_>, sqlx::Error>>()
            })
            .await?;
        leased.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
        });
        Ok(leased)
    }

    /// processing -> completed. Returns false if the task was not processing.
    pub async fn complete(&self, key: TaskKey) -> StoreResult<bool> {
        self.with_retry("complete", move || async move {
            let r = sqlx::query(
                r#"
                UPDATE download_queue
                SET status = 'completed',
                    error_message = NULL
                WHERE collection_id = ?1 AND item_id = ?2 AND status = 'processing'
                "#,
            )
            .bind(key.collection_id)
            .bind(key.item_id)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(r.rows_affected() == 1)
        })
        .await
    }

    /// Record a failed attempt: always increments `retry_count`.
    ///
    /// With `requeue_after` and budget left the task goes back to pending,
    /// eligible after the delay; otherwise it becomes failed. Returns the
    /// updated row, or None if the task was not processing.
    pub async fn fail(
        &self,
        key: TaskKey,
        error: &str,
        requeue_after: Option<Duration>,
    ) -> StoreResult<Option<TaskRecord>> {
        let requeue = requeue_after.is_some();
        let delay = requeue_after.map(millis).unwrap_or(0);
        self.with_retry("fail", move || async move {
            let next = unix_timestamp_ms().saturating_add(delay);
            let row = sqlx::query(
                r#"
                UPDATE download_queue
                SET current_retries = current_retries + 1,
                    error_message = ?1,
                    status = CASE
                        WHEN ?2 AND current_retries + 1 < max_retries THEN 'pending'
                        ELSE 'failed'
                    END,
                    scheduled_at = CASE
                        WHEN ?2 AND current_retries + 1 < max_retries THEN ?3
                        ELSE scheduled_at
                    END
                WHERE collection_id = ?4 AND item_id = ?5 AND status = 'processing'
                RETURNING collection_id, item_id, status, priority, max_retries,
                          current_retries, scheduled_at, processed_at, error_message
                "#,
            )
            .bind(error)
            .bind(requeue)
            .bind(next)
            .bind(key.collection_id)
            .bind(key.item_id)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(task_from_row).transpose()
        })
        .await
    }

    /// processing -> pending after a wait mandated by the remote side,
    /// without charging the retry budget.
    pub async fn defer(&self, key: TaskKey, error: &str, wait: Duration) -> StoreResult<bool> {
        let wait = millis(wait);
        self.with_retry("defer", move || async move {
            let next = unix_timestamp_ms().saturating_add(wait);
            let r = sqlx::query(
                r#"
                UPDATE download_queue
                SET status = 'pending',
                    error_message = ?1,
                    scheduled_at = ?2
                WHERE collection_id = ?3 AND item_id = ?4 AND status = 'processing'
                "#,
            )
            .bind(error)
            .bind(next)
            .bind(key.collection_id)
            .bind(key.item_id)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(r.rows_affected() == 1)
        })
        .await
    }

    /// processing -> pending without charging the budget or moving the
    /// schedule: hands back a lease that must not run yet.
    pub async fn release(&self, key: TaskKey) -> StoreResult<bool> {
        self.with_retry("release", move || async move {
            let r = sqlx::query(
                r#"
                UPDATE download_queue
                SET status = 'pending'
                WHERE collection_id = ?1 AND item_id = ?2 AND status = 'processing'
                "#,
            )
            .bind(key.collection_id)
            .bind(key.item_id)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(r.rows_affected() == 1)
        })
        .await
    }

    /// processing -> skipped.
    pub async fn skip(&self, key: TaskKey, reason: &str) -> StoreResult<bool> {
        self.with_retry("skip", move || async move {
            let r = sqlx::query(
                r#"
                UPDATE download_queue
                SET status = 'skipped',
                    error_message = ?1
                WHERE collection_id = ?2 AND item_id = ?3 AND status = 'processing'
                "#,
            )
            .bind(reason)
            .bind(key.collection_id)
            .bind(key.item_id)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(r.rows_affected() == 1)
        })
        .await
    }

    /// pending|processing -> cancelled for one task (operator abort).
    pub async fn cancel_task(&self, key: TaskKey, reason: &str) -> StoreResult<bool> {
        self.with_retry("cancel_task", move || async move {
            let r = sqlx::query(
                r#"
                UPDATE download_queue
                SET status = 'cancelled',
                    error_message = ?1
                WHERE collection_id = ?2 AND item_id = ?3
                  AND status IN ('pending', 'processing')
                "#,
            )
            .bind(reason)
            .bind(key.collection_id)
            .bind(key.item_id)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(r.rows_affected() == 1)
        })
        .await
    }

    /// Move every pending task to cancelled in one statement. Returns the count.
    pub async fn cancel_pending(&self, reason: &str) -> StoreResult<u64> {
        self.with_retry("cancel_pending", move || async move {
            let r = sqlx::query(
                r#"
                UPDATE download_queue
                SET status = 'cancelled',
                    error_message = ?1
                WHERE status = 'pending'
                "#,
            )
            .bind(reason)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(r.rows_affected())
        })
        .await
    }

    /// Normalize any task left in `processing` to `pending` (e.g. after a crash).
    /// Call before starting workers so stranded tasks are picked up again.
    /// Returns the number of tasks reset.
    pub async fn recover_processing(&self) -> StoreResult<u64> {
        self.with_retry("recover_processing", move || async move {
            let r = sqlx::query(
                r#"
                UPDATE download_queue
                SET status = 'pending'
                WHERE status = 'processing'
                "#,
            )
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(r.rows_affected())
        })
        .await
    }

    /// Explicit operator retry: a terminal task goes back to pending with
    /// `retry_count = 0` and is eligible immediately.
    pub async fn retry(&self, key: TaskKey) -> StoreResult<RetryOutcome> {
        self.with_retry("retry", move || async move {
            let now = unix_timestamp_ms();
            let mut tx = self.pool.begin().await?;
            let reset = sqlx::query(
                r#"
                UPDATE download_queue
                SET status = 'pending',
                    current_retries = 0,
                    scheduled_at = ?1,
                    processed_at = NULL,
                    error_message = NULL
                WHERE collection_id = ?2 AND item_id = ?3
                  AND status IN ('completed', 'failed', 'skipped', 'cancelled')
                "#,
            )
            .bind(now)
            .bind(key.collection_id)
            .bind(key.item_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            let outcome = if reset == 1 {
                RetryOutcome::Requeued
            } else {
                let exists = sqlx::query(
                    r#"
                    SELECT COUNT(*) AS n FROM download_queue
                    WHERE collection_id = ?1 AND item_id = ?2
                    "#,
                )
                .bind(key.collection_id)
                .bind(key.item_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get::<i64, _>("n")?
                    > 0;
                if exists {
                    RetryOutcome::AlreadyQueued
                } else {
                    RetryOutcome::NotFound
                }
            };
            tx.commit().await?;
            Ok::<_, sqlx::Error>(outcome)
        })
        .await
    }
}
