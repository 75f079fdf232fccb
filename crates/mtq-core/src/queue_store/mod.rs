//! Persistent task queue (SQLite via sqlx).
//!
//! Stores one row per `(collection_id, item_id)` with its lifecycle status,
//! retry budget and schedule, plus the append-only history and daily
//! statistics tables used by [`crate::history`]. Every transition is a
//! conditional update on the current status, so a stale writer can never move
//! a task backwards.

mod db;
mod error;
mod tasks;
mod types;

pub use db::{QueueStore, StorageRetry};
pub use error::{StoreError, StoreResult};
pub use types::*;

pub(crate) use db::unix_timestamp_ms;
