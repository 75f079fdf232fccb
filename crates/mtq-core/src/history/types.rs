//! History rows, filters and daily rollups.

use serde::Serialize;

use crate::task::{TaskKey, TaskStatus};

/// Largest page a history query will return.
pub const MAX_PAGE_SIZE: u32 = 500;

/// A terminal outcome about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub key: TaskKey,
    pub status: TaskStatus,
    /// Bytes transferred (0 unless completed).
    pub file_size: u64,
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn completed(key: TaskKey, file_size: u64) -> Self {
        Self {
            key,
            status: TaskStatus::Completed,
            file_size,
            error: None,
        }
    }

    pub fn with_error(key: TaskKey, status: TaskStatus, error: impl Into<String>) -> Self {
        Self {
            key,
            status,
            file_size: 0,
            error: Some(error.into()),
        }
    }
}

/// One stored history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub key: TaskKey,
    pub status: TaskStatus,
    pub file_size: u64,
    pub error: Option<String>,
    /// Unix ms.
    pub timestamp: i64,
}

/// History query: optional filters plus 1-based paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryFilter {
    pub collection_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            collection_id: None,
            status: None,
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub rows: Vec<HistoryRecord>,
    pub page: u32,
    pub page_size: u32,
    pub total_rows: u64,
    /// 0 when there are no matching rows.
    pub total_pages: u64,
}

/// Per-day, per-collection rollup of terminal outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyStats {
    /// UTC date, `YYYY-MM-DD`.
    pub date: String,
    pub collection_id: i64,
    pub success_count: u64,
    pub fail_count: u64,
    pub skip_count: u64,
    pub total_bytes: u64,
}
