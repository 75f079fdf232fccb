//! Integration tests: engine + worker pool against a scripted collaborator.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::stub_transfer::StubTransfer;
use common::{engine_with, settings, wait_for};
use mtq_core::control::{ControlCommand, ControlError, RunState};
use mtq_core::engine::EngineError;
use mtq_core::history::HistoryFilter;
use mtq_core::queue_store::RetryOutcome;
use mtq_core::task::{TaskKey, TaskStatus};
use mtq_core::transfer::{TransferError, TransferOutcome};
use mtq_core::worker::{PoolMode, WorkerPool};

const COLL: i64 = -1001;

fn key(item: i64) -> TaskKey {
    TaskKey::new(COLL, item)
}

fn network(msg: &str) -> TransferOutcome {
    TransferOutcome::Failed(TransferError::Network(msg.to_string()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_tasks_two_workers_complete() {
    let (stub, gate) = StubTransfer::gated(1000);
    let stub = Arc::new(stub);
    let engine = engine_with(stub.clone(), settings(2)).await;
    engine.enqueue(COLL, &[1, 2, 3]).await.unwrap();
    engine.start_run().await.unwrap();

    let pool = WorkerPool::spawn(engine.clone(), PoolMode::Drain);
    assert_eq!(pool.size(), 2);
    let e = &engine;
    wait_for("two half-done transfers", move || async move {
        let snap = e.snapshot();
        snap.active == 2 && snap.per_task.iter().all(|p| p.downloaded_bytes == 500)
    })
    .await;

    let snap = engine.snapshot();
    assert_eq!(snap.total, 3);
    assert_eq!(engine.counts().await.unwrap().pending, 1);
    assert!((snap.overall_percentage - 100.0 / 3.0).abs() < 1e-6);

    gate.add_permits(100);
    pool.join().await;

    assert!(stub.max_active() <= 2);
    let counts = engine.counts().await.unwrap();
    assert_eq!(counts.completed, 3);
    let snap = engine.snapshot();
    assert_eq!(snap.completed_count, 3);
    assert_eq!(snap.active, 0);
    assert!((snap.overall_percentage - 100.0).abs() < 1e-9);

    let history = engine.history(HistoryFilter::default()).await.unwrap();
    assert_eq!(history.total_rows, 3);
    assert!(history.rows.iter().all(|r| r.status == TaskStatus::Completed));
    assert!(history.rows.iter().all(|r| r.file_size == 1000));

    let stats = engine.daily_stats(Some(COLL)).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].success_count, 3);
    assert_eq!(stats[0].total_bytes, 3000);
}

#[tokio::test]
async fn retry_budget_exhausts_to_failed() {
    let stub = StubTransfer::new(10).script(
        key(1),
        vec![network("reset"), network("reset"), network("reset")],
    );
    let engine = engine_with(Arc::new(stub), settings(1)).await;
    let mut events = engine.subscribe();
    engine.enqueue(COLL, &[1]).await.unwrap();
    engine.start_run().await.unwrap();

    WorkerPool::spawn(engine.clone(), PoolMode::Drain).join().await;

    let t = engine.task(key(1)).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Failed);
    assert_eq!(t.retry_count, 3);
    assert_eq!(t.last_error.as_deref(), Some("network error: reset"));

    let ev = events.recv().await.unwrap();
    assert_eq!(ev.key, key(1));
    assert_eq!(ev.status, TaskStatus::Failed);

    let history = engine.history(HistoryFilter::default()).await.unwrap();
    assert_eq!(history.total_rows, 1);
    assert_eq!(history.rows[0].status, TaskStatus::Failed);
    assert_eq!(engine.snapshot().finished_count, 1);
}

#[tokio::test]
async fn transient_failures_then_success() {
    let stub = StubTransfer::new(10).script(key(1), vec![network("a"), network("b")]);
    let stub = Arc::new(stub);
    let engine = engine_with(stub.clone(), settings(1)).await;
    engine.enqueue(COLL, &[1]).await.unwrap();
    engine.start_run().await.unwrap();

    WorkerPool::spawn(engine.clone(), PoolMode::Drain).join().await;

    let t = engine.task(key(1)).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Completed);
    assert_eq!(t.retry_count, 2);
    assert_eq!(stub.calls(), 3);
    // Only the terminal outcome is recorded.
    assert_eq!(engine.history(HistoryFilter::default()).await.unwrap().total_rows, 1);
}

#[tokio::test]
async fn rate_limit_does_not_charge_budget() {
    let stub = StubTransfer::new(10).script(
        key(1),
        vec![TransferOutcome::Failed(TransferError::RateLimited {
            wait: Duration::from_millis(20),
        })],
    );
    let engine = engine_with(Arc::new(stub), settings(1)).await;
    engine.enqueue_with(COLL, &[1], 0, 1).await.unwrap();
    engine.start_run().await.unwrap();

    WorkerPool::spawn(engine.clone(), PoolMode::Drain).join().await;

    let t = engine.task(key(1)).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Completed);
    assert_eq!(t.retry_count, 0);
}

#[tokio::test]
async fn permanent_errors_are_terminal_immediately() {
    let stub = StubTransfer::new(10)
        .script(
            key(1),
            vec![TransferOutcome::Failed(TransferError::NotFound("deleted".into()))],
        )
        .script(
            key(2),
            vec![TransferOutcome::Failed(TransferError::Unsupported("poll".into()))],
        )
        .script(
            key(3),
            vec![TransferOutcome::Skipped {
                reason: "zero-size item".into(),
            }],
        );
    let engine = engine_with(Arc::new(stub), settings(2)).await;
    engine.enqueue(COLL, &[1, 2, 3]).await.unwrap();
    engine.start_run().await.unwrap();

    WorkerPool::spawn(engine.clone(), PoolMode::Drain).join().await;

    let t1 = engine.task(key(1)).await.unwrap().unwrap();
    assert_eq!(t1.status, TaskStatus::Failed);
    assert_eq!(t1.retry_count, 1);
    assert_eq!(
        engine.task(key(2)).await.unwrap().unwrap().status,
        TaskStatus::Skipped
    );
    assert_eq!(
        engine.task(key(3)).await.unwrap().unwrap().status,
        TaskStatus::Skipped
    );

    let stats = engine.daily_stats(None).await.unwrap();
    assert_eq!(stats[0].fail_count, 1);
    assert_eq!(stats[0].skip_count, 2);
    assert!((engine.snapshot().overall_percentage - 100.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paused_engine_leases_nothing_until_resumed() {
    let stub = Arc::new(StubTransfer::new(10));
    let engine = engine_with(stub.clone(), settings(2)).await;
    engine.enqueue(COLL, &[1, 2, 3, 4, 5]).await.unwrap();
    engine.start_run().await.unwrap();
    assert_eq!(engine.control(ControlCommand::Pause).await.unwrap(), RunState::Paused);

    let pool = WorkerPool::spawn(engine.clone(), PoolMode::Drain);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snap = engine.snapshot();
    assert_eq!(snap.total, 5);
    assert_eq!(snap.active, 0);
    assert_eq!(snap.run_state, RunState::Paused);
    assert_eq!(engine.counts().await.unwrap().pending, 5);
    assert_eq!(stub.calls(), 0);

    engine.control(ControlCommand::Resume).await.unwrap();
    pool.join().await;
    assert_eq!(engine.counts().await.unwrap().completed, 5);
    assert_eq!(engine.snapshot().completed_count, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn half_transferred_single_task_is_fifty_percent() {
    let (stub, gate) = StubTransfer::gated(100);
    let engine = engine_with(Arc::new(stub), settings(1)).await;
    engine.enqueue(COLL, &[1]).await.unwrap();
    engine.start_run().await.unwrap();

    let pool = WorkerPool::spawn(engine.clone(), PoolMode::Drain);
    let e = &engine;
    wait_for("first progress sample", move || async move {
        e.snapshot()
            .per_task
            .first()
            .is_some_and(|p| p.downloaded_bytes == 50)
    })
    .await;

    let snap = engine.snapshot();
    assert_eq!(snap.total, 1);
    assert_eq!(snap.finished_count, 0);
    assert!((snap.overall_percentage - 50.0).abs() < 1e-9);
    assert_eq!(snap.per_task[0].display_name.as_deref(), Some("item-1"));
    assert_eq!(snap.overall_speed, 1000.0);
    assert!(snap.eta_secs.is_some());

    gate.add_permits(1);
    pool.join().await;
    assert!((engine.snapshot().overall_percentage - 100.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_reaches_every_task() {
    let (stub, _gate) = StubTransfer::gated(100);
    let stub = Arc::new(stub);
    let engine = engine_with(stub.clone(), settings(2)).await;
    let mut events = engine.subscribe();
    engine.enqueue(COLL, &[1, 2, 3, 4, 5, 6]).await.unwrap();
    engine.start_run().await.unwrap();

    let pool = WorkerPool::spawn(engine.clone(), PoolMode::Drain);
    let e = &engine;
    wait_for("two active transfers", move || async move { e.snapshot().active == 2 }).await;

    assert_eq!(
        engine.control(ControlCommand::Cancel).await.unwrap(),
        RunState::Cancelled
    );
    tokio::time::timeout(Duration::from_secs(5), pool.join())
        .await
        .unwrap();

    let counts = engine.counts().await.unwrap();
    assert_eq!(counts.cancelled, 6);
    assert_eq!(counts.outstanding(), 0);
    assert_eq!(counts.failed, 0);
    assert_eq!(stub.active(), 0);

    // Only the two in-flight tasks produce history rows and events.
    let history = engine.history(HistoryFilter::default()).await.unwrap();
    assert_eq!(history.total_rows, 2);
    assert!(history.rows.iter().all(|r| r.status == TaskStatus::Cancelled));
    for _ in 0..2 {
        assert_eq!(events.recv().await.unwrap().status, TaskStatus::Cancelled);
    }

    let snap = engine.snapshot();
    assert_eq!(snap.active, 0);
    assert_eq!(snap.finished_count, 6);
    assert_eq!(snap.run_state, RunState::Cancelled);

    assert!(matches!(
        engine.control(ControlCommand::Resume).await,
        Err(EngineError::Control(ControlError::InvalidTransition { .. }))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_lets_in_flight_tasks_finish() {
    let (stub, gate) = StubTransfer::gated(10);
    let stub = Arc::new(stub);
    let engine = engine_with(stub.clone(), settings(2)).await;
    engine.enqueue(COLL, &[1, 2]).await.unwrap();
    engine.start_run().await.unwrap();

    let pool = WorkerPool::spawn(engine.clone(), PoolMode::Continuous);
    let e = &engine;
    wait_for("two active transfers", move || async move { e.snapshot().active == 2 }).await;

    engine.control(ControlCommand::Pause).await.unwrap();
    engine.enqueue(COLL, &[3]).await.unwrap();
    gate.add_permits(10);
    wait_for("in-flight tasks completed", move || async move {
        e.counts().await.unwrap().completed == 2
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        engine.task(key(3)).await.unwrap().unwrap().status,
        TaskStatus::Pending
    );
    assert_eq!(stub.calls(), 2);

    pool.shutdown();
    pool.join().await;
}

#[tokio::test]
async fn stalled_transfer_fails_retryably() {
    let mut s = settings(1);
    s.stall_timeout = Duration::from_millis(100);
    let engine = engine_with(Arc::new(StubTransfer::hanging()), s).await;
    engine.enqueue_with(COLL, &[1], 0, 2).await.unwrap();
    engine.start_run().await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        WorkerPool::spawn(engine.clone(), PoolMode::Drain).join(),
    )
    .await
    .unwrap();

    let t = engine.task(key(1)).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Failed);
    assert_eq!(t.retry_count, 2);
    assert!(t.last_error.unwrap().starts_with("stalled"));
}

#[tokio::test]
async fn operator_retry_requeues_terminal_task() {
    let stub = StubTransfer::new(10).script(
        key(1),
        vec![TransferOutcome::Failed(TransferError::Unauthorized("expired".into()))],
    );
    let engine = engine_with(Arc::new(stub), settings(1)).await;
    engine.enqueue(COLL, &[1]).await.unwrap();
    engine.start_run().await.unwrap();
    WorkerPool::spawn(engine.clone(), PoolMode::Drain).join().await;
    assert_eq!(
        engine.task(key(1)).await.unwrap().unwrap().status,
        TaskStatus::Failed
    );

    assert_eq!(engine.retry(COLL, 1).await.unwrap(), RetryOutcome::Requeued);
    assert_eq!(engine.retry(COLL, 1).await.unwrap(), RetryOutcome::AlreadyQueued);
    assert_eq!(engine.retry(COLL, 99).await.unwrap(), RetryOutcome::NotFound);
    assert_eq!(engine.pending_retries().await.unwrap().len(), 1);

    WorkerPool::spawn(engine.clone(), PoolMode::Drain).join().await;
    assert_eq!(
        engine.task(key(1)).await.unwrap().unwrap().status,
        TaskStatus::Completed
    );
    let history = engine.history(HistoryFilter::default()).await.unwrap();
    assert_eq!(history.total_rows, 2);
    assert_eq!(history.rows[0].status, TaskStatus::Completed);
}

#[tokio::test]
async fn start_run_recovers_stranded_tasks() {
    let engine = engine_with(Arc::new(StubTransfer::new(10)), settings(1)).await;
    engine.enqueue(COLL, &[1, 2]).await.unwrap();
    engine.store().lease_next(2).await.unwrap();
    assert_eq!(engine.counts().await.unwrap().processing, 2);

    assert_eq!(engine.start_run().await.unwrap(), 2);
    assert_eq!(engine.snapshot().total, 2);
    WorkerPool::spawn(engine.clone(), PoolMode::Drain).join().await;
    assert_eq!(engine.counts().await.unwrap().completed, 2);
}

#[tokio::test]
async fn empty_completion_is_recorded_as_skip() {
    let stub = StubTransfer::new(10).script(key(1), vec![TransferOutcome::Completed { size: 0 }]);
    let engine = engine_with(Arc::new(stub), settings(1)).await;
    engine.enqueue(COLL, &[1, 2]).await.unwrap();
    engine.start_run().await.unwrap();

    WorkerPool::spawn(engine.clone(), PoolMode::Drain).join().await;

    let t1 = engine.task(key(1)).await.unwrap().unwrap();
    assert_eq!(t1.status, TaskStatus::Skipped);
    assert_eq!(t1.last_error.as_deref(), Some("zero-size item"));
    assert_eq!(
        engine.task(key(2)).await.unwrap().unwrap().status,
        TaskStatus::Completed
    );

    let stats = engine.daily_stats(None).await.unwrap();
    assert_eq!(stats[0].success_count, 1);
    assert_eq!(stats[0].skip_count, 1);
    assert_eq!(stats[0].total_bytes, 10);
}
