//! Errors surfaced by the queue store.

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lock contention persisted past the bounded retry budget.
    #[error("storage unavailable: {op} failed after {attempts} attempts: {source}")]
    Unavailable {
        op: &'static str,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// True when the caller should idle and try again later rather than give up.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Lock conflicts and pool exhaustion are transient under concurrent writers.
pub(crate) fn is_contention(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            // Extended result codes carry the primary code in the low byte:
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6.
            let primary = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff);
            if matches!(primary, Some(5) | Some(6)) {
                return true;
            }
            let msg = db.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}
