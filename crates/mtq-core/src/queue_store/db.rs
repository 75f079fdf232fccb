//! SQLite-backed queue store implementation.
//!
//! Handles connection, migrations, timestamp helpers and the bounded retry of
//! lock contention. Task reads/writes live in `tasks`.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::error::{is_contention, StoreError, StoreResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS download_queue (
        collection_id INTEGER NOT NULL,
        item_id INTEGER NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        current_retries INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending',
        scheduled_at INTEGER NOT NULL,
        processed_at INTEGER,
        error_message TEXT,
        PRIMARY KEY (collection_id, item_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_download_queue_eligible
        ON download_queue (status, priority DESC, scheduled_at ASC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS download_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection_id INTEGER NOT NULL,
        item_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        file_size INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        timestamp INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_download_history_key
        ON download_history (collection_id, item_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS download_stats (
        date TEXT NOT NULL,
        collection_id INTEGER NOT NULL,
        success_count INTEGER NOT NULL DEFAULT 0,
        fail_count INTEGER NOT NULL DEFAULT 0,
        skip_count INTEGER NOT NULL DEFAULT 0,
        total_bytes INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (date, collection_id)
    )
    "#,
    // Rows a worker may still pick up, with the most recent failure text
    // (from the row itself or, after an operator reset, from history).
    r#"
    CREATE VIEW IF NOT EXISTS retry_queue AS
    SELECT
        q.collection_id,
        q.item_id,
        q.priority,
        q.max_retries,
        q.current_retries,
        q.scheduled_at,
        COALESCE(
            q.error_message,
            (SELECT h.error_message FROM download_history h
             WHERE h.collection_id = q.collection_id
               AND h.item_id = q.item_id
               AND h.error_message IS NOT NULL
             ORDER BY h.id DESC
             LIMIT 1)
        ) AS last_error
    FROM download_queue q
    WHERE q.status = 'pending' AND q.current_retries < q.max_retries
    ORDER BY q.priority DESC, q.scheduled_at ASC
    "#,
];

/// Bounded, jittered retry of storage lock contention.
#[derive(Debug, Clone, Copy)]
pub struct StorageRetry {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled per attempt.
    pub base_delay: Duration,
}

impl Default for StorageRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl StorageRetry {
    /// Exponential delay plus up to one base delay of jitter so contending
    /// writers do not retry in lockstep.
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(10));
        let base_ms = self.base_delay.as_millis() as u64;
        exp + Duration::from_millis(fastrand::u64(0..=base_ms))
    }
}

/// Handle to the SQLite-backed task queue.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/mtq/queue.db` by default.
#[derive(Clone)]
pub struct QueueStore {
    pub(crate) pool: Pool<Sqlite>,
    pub(crate) retry: StorageRetry,
}

impl QueueStore {
    /// Open (or create) the default queue database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("mtq")?;
        let db_path = xdg_dirs.get_state_home().join("queue.db");
        Self::open_at(db_path).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(250));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        let store = QueueStore {
            pool,
            retry: StorageRetry::default(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory database (no disk I/O). The single connection is
    /// kept for the lifetime of the pool so the data survives idle periods.
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let store = QueueStore {
            pool,
            retry: StorageRetry::default(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Replace the storage contention policy (e.g. from `MtqConfig::storage_retry`).
    pub fn with_storage_retry(mut self, retry: StorageRetry) -> Self {
        self.retry = retry;
        self
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Run `f` until it succeeds, fails with a non-contention error, or the
    /// contention budget is spent (reported as `StoreError::Unavailable`).
    pub(crate) async fn with_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 1u32;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if is_contention(&e) => {
                    if attempt >= self.retry.max_attempts {
                        tracing::warn!(op, attempt, "storage contention budget exhausted: {}", e);
                        return Err(StoreError::Unavailable {
                            op,
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(op, attempt, delay_ms = delay.as_millis() as u64, "storage contention, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(StoreError::Database(e)),
            }
        }
    }
}

/// Current time as Unix milliseconds (for DB timestamps).
pub(crate) fn unix_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
