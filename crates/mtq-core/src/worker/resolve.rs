//! Turn an execution result into a queue transition, a history row and an event.

use std::time::Duration;
use tokio::sync::watch;

use crate::control::{RunState, TaskAborted};
use crate::engine::{Engine, RUN_CANCELLED};
use crate::history::HistoryEntry;
use crate::notify::TaskEvent;
use crate::queue_store::{unix_timestamp_ms, StoreError, StoreResult, TaskRecord};
use crate::retry::{classify, ErrorKind, RetryDecision};
use crate::task::{TaskKey, TaskStatus};
use crate::transfer::{TransferOutcome, ZERO_SIZE_REASON};

use super::execute::Execution;

/// Upper bound on the wait between attempts to record an outcome.
const MAX_RESOLVE_BACKOFF: Duration = Duration::from_secs(5);

/// Resolve the execution of `task` and release its progress entry.
///
/// The task stays PROCESSING and owned by this worker until its transition is
/// written: store errors are retried with backoff until they clear or the
/// pool shuts down, in which case the next run recovers the row.
pub(super) async fn resolve(
    engine: &Engine,
    task: &TaskRecord,
    execution: Execution,
    shutdown: &mut watch::Receiver<bool>,
) {
    let key = task.key;
    let mut backoff = engine.settings().poll_interval;
    let outcome = loop {
        match settle(engine, task, &execution).await {
            Ok(status) => break status,
            Err(e) => {
                log_store_error(key, &e);
                if *shutdown.borrow() {
                    break None;
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {
                        tracing::warn!(
                            collection_id = key.collection_id,
                            item_id = key.item_id,
                            "shutting down before the outcome was recorded; task left processing"
                        );
                        break None;
                    }
                }
                backoff = backoff.saturating_mul(2).min(MAX_RESOLVE_BACKOFF);
            }
        }
    };
    engine.progress().finish(key, outcome);
}

async fn settle(
    engine: &Engine,
    task: &TaskRecord,
    execution: &Execution,
) -> StoreResult<Option<TaskStatus>> {
    let key = task.key;
    match execution {
        Execution::Finished(TransferOutcome::Completed { size: 0 }) => {
            on_skipped(engine, key, ZERO_SIZE_REASON).await
        }
        Execution::Finished(TransferOutcome::Completed { size }) => {
            on_completed(engine, key, *size).await
        }
        Execution::Finished(TransferOutcome::Skipped { reason }) => {
            on_skipped(engine, key, reason).await
        }
        Execution::Finished(TransferOutcome::Failed(err)) => {
            on_failed(engine, task, classify(err), &err.to_string()).await
        }
        Execution::Stalled(idle) => {
            let message = format!("stalled: no progress for {}s", idle.as_secs());
            on_failed(engine, task, ErrorKind::Stalled, &message).await
        }
        Execution::Cancelled => on_cancelled(engine, key).await,
    }
}

fn log_store_error(key: TaskKey, e: &StoreError) {
    if e.is_unavailable() {
        tracing::warn!(
            collection_id = key.collection_id,
            item_id = key.item_id,
            "storage busy, outcome not recorded yet: {}",
            e
        );
    } else {
        tracing::error!(
            collection_id = key.collection_id,
            item_id = key.item_id,
            "could not record task outcome: {}",
            e
        );
    }
}

/// Write history and notify subscribers for a task that reached `entry.status`.
/// History failures are logged; the queue transition already happened.
async fn announce(engine: &Engine, entry: HistoryEntry) -> TaskStatus {
    let key = entry.key;
    if let Err(e) = engine.history_recorder().record(&entry).await {
        tracing::warn!(
            collection_id = key.collection_id,
            item_id = key.item_id,
            "failed to write history: {}",
            e
        );
    }
    let status = entry.status;
    engine.events().publish(TaskEvent {
        key,
        status,
        file_size: entry.file_size,
        error: entry.error,
        at: unix_timestamp_ms(),
    });
    status
}

fn lost_lease(key: TaskKey, what: &str) {
    tracing::warn!(
        collection_id = key.collection_id,
        item_id = key.item_id,
        "task no longer processing; {} dropped",
        what
    );
}

async fn on_completed(engine: &Engine, key: TaskKey, size: u64) -> StoreResult<Option<TaskStatus>> {
    if !engine.store().complete(key).await? {
        lost_lease(key, "completion");
        return Ok(None);
    }
    tracing::info!(collection_id = key.collection_id, item_id = key.item_id, size, "task completed");
    Ok(Some(announce(engine, HistoryEntry::completed(key, size)).await))
}

async fn on_skipped(engine: &Engine, key: TaskKey, reason: &str) -> StoreResult<Option<TaskStatus>> {
    if !engine.store().skip(key, reason).await? {
        lost_lease(key, "skip");
        return Ok(None);
    }
    tracing::info!(collection_id = key.collection_id, item_id = key.item_id, reason, "task skipped");
    let entry = HistoryEntry::with_error(key, TaskStatus::Skipped, reason);
    Ok(Some(announce(engine, entry).await))
}

async fn on_cancelled(engine: &Engine, key: TaskKey) -> StoreResult<Option<TaskStatus>> {
    let reason = TaskAborted.to_string();
    if !engine.store().cancel_task(key, &reason).await? {
        lost_lease(key, "cancellation");
        return Ok(None);
    }
    tracing::info!(collection_id = key.collection_id, item_id = key.item_id, "task cancelled");
    let entry = HistoryEntry::with_error(key, TaskStatus::Cancelled, reason);
    Ok(Some(announce(engine, entry).await))
}

async fn on_failed(
    engine: &Engine,
    task: &TaskRecord,
    kind: ErrorKind,
    message: &str,
) -> StoreResult<Option<TaskStatus>> {
    let key = task.key;
    let store = engine.store();
    let attempt = task.retry_count + 1;
    match engine
        .policy()
        .should_retry(task.retry_count, task.max_retries, kind)
    {
        RetryDecision::RetryAfter(delay) => {
            let Some(row) = store.fail(key, message, Some(delay)).await? else {
                lost_lease(key, "failure");
                return Ok(None);
            };
            if row.status == TaskStatus::Pending {
                tracing::info!(
                    collection_id = key.collection_id,
                    item_id = key.item_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transfer failed, requeued: {}",
                    message
                );
                return requeued(engine, key).await;
            }
            failed(engine, key, message, attempt).await
        }
        RetryDecision::WaitFor(wait) => {
            if !store.defer(key, message, wait).await? {
                lost_lease(key, "deferral");
                return Ok(None);
            }
            tracing::info!(
                collection_id = key.collection_id,
                item_id = key.item_id,
                wait_ms = wait.as_millis() as u64,
                "rate limited, deferred"
            );
            requeued(engine, key).await
        }
        RetryDecision::NoRetry if kind == ErrorKind::Unsupported => {
            on_skipped(engine, key, message).await
        }
        RetryDecision::NoRetry => {
            if store.fail(key, message, None).await?.is_none() {
                lost_lease(key, "failure");
                return Ok(None);
            }
            failed(engine, key, message, attempt).await
        }
    }
}

async fn failed(
    engine: &Engine,
    key: TaskKey,
    message: &str,
    attempt: u32,
) -> StoreResult<Option<TaskStatus>> {
    tracing::warn!(
        collection_id = key.collection_id,
        item_id = key.item_id,
        attempt,
        "task failed: {}",
        message
    );
    let entry = HistoryEntry::with_error(key, TaskStatus::Failed, message);
    Ok(Some(announce(engine, entry).await))
}

/// The row went back to PENDING. If the run was cancelled meanwhile, the bulk
/// cancel may already have passed it by, so cancel it here.
async fn requeued(engine: &Engine, key: TaskKey) -> StoreResult<Option<TaskStatus>> {
    if engine.run_state() != RunState::Cancelled {
        return Ok(None);
    }
    if !engine.store().cancel_task(key, RUN_CANCELLED).await? {
        return Ok(None);
    }
    let entry = HistoryEntry::with_error(key, TaskStatus::Cancelled, RUN_CANCELLED);
    Ok(Some(announce(engine, entry).await))
}
