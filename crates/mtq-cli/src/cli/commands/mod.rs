//! CLI command handlers. Each command is in its own file.

mod add;
mod cancel;
mod completions;
mod history;
mod pause;
mod pending;
mod resume;
mod retry;
mod run;
mod stats;
mod status;

pub use add::{run_add, AddArgs};
pub use cancel::run_cancel;
pub use completions::run_completions;
pub use history::{run_history, HistoryArgs};
pub use pause::run_pause;
pub use pending::run_pending;
pub use resume::run_resume;
pub use retry::run_retry;
pub use run::{run_queue, RunArgs};
pub use stats::run_stats;
pub use status::run_status;

/// Human-readable byte count.
pub(crate) fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Unix ms as `YYYY-MM-DD HH:MM:SS` (UTC).
pub(crate) fn format_ts(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
