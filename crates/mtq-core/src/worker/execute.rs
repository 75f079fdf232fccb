//! Run one leased task: register it, drive the collaborator and watch for
//! cancellation or a stall at every checkpoint.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::engine::Engine;
use crate::progress::ProgressReporter;
use crate::queue_store::TaskRecord;
use crate::transfer::{TransferItem, TransferOutcome};

/// How an execution ended.
#[derive(Debug)]
pub(super) enum Execution {
    Finished(TransferOutcome),
    /// The abort token was seen at a checkpoint; the transfer was dropped.
    Cancelled,
    /// No byte progress for this long; the transfer was dropped.
    Stalled(Duration),
}

/// Drive the collaborator for `task`. The task stays registered with the
/// control plane and the aggregator until this returns; the caller resolves
/// the outcome and removes it from the aggregator.
pub(super) async fn execute(engine: &Engine, task: &TaskRecord) -> Execution {
    let key = task.key;
    let settings = engine.settings();
    let abort = engine.control_plane().register(key);
    engine.progress().begin(key);

    let reporter = ProgressReporter::new(
        key,
        Arc::clone(engine.progress()),
        abort,
        settings.progress_interval,
    );
    let item = TransferItem {
        key,
        retry_count: task.retry_count,
        priority: task.priority,
    };

    let execution = tokio::select! {
        outcome = engine.transfer().transfer(&item, &reporter) => match outcome {
            // A collaborator that gave up because `report` returned false.
            TransferOutcome::Failed(_) | TransferOutcome::Skipped { .. } if reporter.is_aborted() => {
                Execution::Cancelled
            }
            outcome => Execution::Finished(outcome),
        },
        interrupt = watchdog(&reporter, settings.checkpoint_interval, settings.stall_timeout) => interrupt,
    };

    engine.control_plane().unregister(key);
    execution
}

/// Checkpoint ticker: the first tick is immediate, so a token tripped before
/// the task started aborts it without waiting a full interval.
async fn watchdog(reporter: &ProgressReporter, checkpoint: Duration, stall: Duration) -> Execution {
    let mut ticker = tokio::time::interval(checkpoint);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if reporter.is_aborted() {
            return Execution::Cancelled;
        }
        let idle = reporter.idle_for();
        if idle >= stall {
            return Execution::Stalled(idle);
        }
    }
}
