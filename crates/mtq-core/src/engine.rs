//! The engine: queue, history, run control, progress and events behind one
//! cloneable handle. Workers and outer surfaces (CLI, control socket) share it.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{EngineSettings, MtqConfig};
use crate::control::{ControlCommand, ControlError, ControlPlane, RunState};
use crate::history::{DailyStats, HistoryFilter, HistoryPage, HistoryRecorder};
use crate::notify::{EventBus, NotificationPort, TaskEvent};
use crate::progress::{AggregateSnapshot, ProgressAggregator};
use crate::queue_store::{
    QueueStore, RetryCandidate, RetryOutcome, StatusCounts, StoreError, StoreResult, TaskRecord,
};
use crate::retry::RetryPolicy;
use crate::task::TaskKey;
use crate::transfer::Transfer;

/// Reason stored on rows cancelled by a run-wide cancel.
pub const RUN_CANCELLED: &str = "run cancelled";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of [`Engine::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct EnqueueReport {
    /// Rows newly created; keys already known are updated, not counted.
    pub added_count: u64,
}

#[derive(Clone)]
pub struct Engine {
    store: QueueStore,
    history: HistoryRecorder,
    control: Arc<ControlPlane>,
    progress: Arc<ProgressAggregator>,
    events: EventBus,
    transfer: Arc<dyn Transfer>,
    settings: EngineSettings,
    policy: RetryPolicy,
}

impl Engine {
    pub fn new(
        store: QueueStore,
        transfer: Arc<dyn Transfer>,
        settings: EngineSettings,
        policy: RetryPolicy,
    ) -> Self {
        let progress = Arc::new(ProgressAggregator::new(settings.byte_weight));
        Self {
            history: HistoryRecorder::new(store.clone()),
            store,
            control: Arc::new(ControlPlane::new()),
            progress,
            events: EventBus::default(),
            transfer,
            settings,
            policy,
        }
    }

    pub fn from_config(
        store: QueueStore,
        transfer: Arc<dyn Transfer>,
        cfg: &MtqConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(
            store.with_storage_retry(cfg.storage_retry()),
            transfer,
            cfg.engine_settings(),
            cfg.retry_policy()?,
        ))
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn control_plane(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn history_recorder(&self) -> &HistoryRecorder {
        &self.history
    }

    pub(crate) fn progress(&self) -> &Arc<ProgressAggregator> {
        &self.progress
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn transfer(&self) -> &Arc<dyn Transfer> {
        &self.transfer
    }

    pub(crate) fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Prepare a run: leave any cancelled state, return tasks stranded in
    /// PROCESSING to PENDING and seed the batch from what is outstanding.
    /// Returns the number of recovered tasks.
    pub async fn start_run(&self) -> StoreResult<u64> {
        self.control.start_run();
        let recovered = self.store.recover_processing().await?;
        if recovered > 0 {
            tracing::info!(recovered, "returned stranded tasks to the queue");
        }
        let counts = self.store.counts().await?;
        self.progress.reset_batch(counts.outstanding());
        Ok(recovered)
    }

    /// Queue items of one collection with the configured default priority and budget.
    pub async fn enqueue(&self, collection_id: i64, item_ids: &[i64]) -> StoreResult<EnqueueReport> {
        self.enqueue_with(
            collection_id,
            item_ids,
            self.settings.default_priority,
            self.settings.default_max_retries,
        )
        .await
    }

    pub async fn enqueue_with(
        &self,
        collection_id: i64,
        item_ids: &[i64],
        priority: i64,
        max_retries: u32,
    ) -> StoreResult<EnqueueReport> {
        let added_count = self
            .store
            .enqueue_many(collection_id, item_ids, priority, max_retries)
            .await?;
        self.progress.add_to_batch(added_count);
        tracing::debug!(collection_id, added_count, requested = item_ids.len(), "enqueued");
        Ok(EnqueueReport { added_count })
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        self.progress.snapshot(self.control.state())
    }

    pub fn run_state(&self) -> RunState {
        self.control.state()
    }

    /// Apply an operator command. Cancel also moves every PENDING task to
    /// CANCELLED; in-flight tasks are aborted by their workers.
    pub async fn control(&self, command: ControlCommand) -> Result<RunState, EngineError> {
        let state = self.control.apply(command)?;
        if command == ControlCommand::Cancel {
            let cancelled = self.store.cancel_pending(RUN_CANCELLED).await?;
            self.progress.record_cancelled(cancelled);
            tracing::info!(cancelled, "cancelled pending tasks");
        }
        Ok(state)
    }

    /// Explicit operator retry of a terminal task.
    pub async fn retry(&self, collection_id: i64, item_id: i64) -> StoreResult<RetryOutcome> {
        let key = TaskKey::new(collection_id, item_id);
        let outcome = self.store.retry(key).await?;
        if outcome == RetryOutcome::Requeued {
            self.progress.add_to_batch(1);
            tracing::info!(collection_id, item_id, "task requeued by operator");
        }
        Ok(outcome)
    }

    pub async fn history(&self, filter: HistoryFilter) -> StoreResult<HistoryPage> {
        self.history.query(filter).await
    }

    pub async fn pending_retries(&self) -> StoreResult<Vec<RetryCandidate>> {
        self.store.pending_retries().await
    }

    pub async fn daily_stats(&self, collection_id: Option<i64>) -> StoreResult<Vec<DailyStats>> {
        self.history.daily_stats(collection_id).await
    }

    pub async fn counts(&self) -> StoreResult<StatusCounts> {
        self.store.counts().await
    }

    pub async fn task(&self, key: TaskKey) -> StoreResult<Option<TaskRecord>> {
        self.store.get_task(key).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Lease up to `limit` tasks, or none unless the run is RUNNING.
    pub(crate) async fn lease_next(&self, limit: usize) -> StoreResult<Vec<TaskRecord>> {
        if self.control.state() != RunState::Running {
            return Ok(Vec::new());
        }
        let leased = self.store.lease_next(limit).await?;
        Ok(self.hand_back_if_paused(leased).await)
    }

    /// A pause that returned while the lease was in flight wins: the rows go
    /// back to PENDING untouched. Leases taken during a cancel are kept; their
    /// abort tokens are pre-tripped, so workers cancel them on registration.
    async fn hand_back_if_paused(&self, leased: Vec<TaskRecord>) -> Vec<TaskRecord> {
        if leased.is_empty() || self.control.state() != RunState::Paused {
            return leased;
        }
        let mut kept = Vec::new();
        for task in leased {
            match self.store.release(task.key).await {
                Ok(_) => tracing::debug!(
                    collection_id = task.key.collection_id,
                    item_id = task.key.item_id,
                    "run paused during lease; task handed back"
                ),
                Err(e) => {
                    tracing::warn!(
                        collection_id = task.key.collection_id,
                        item_id = task.key.item_id,
                        "could not hand back lease, running it: {}",
                        e
                    );
                    kept.push(task);
                }
            }
        }
        kept
    }
}

impl NotificationPort for Engine {
    fn snapshot(&self) -> AggregateSnapshot {
        Engine::snapshot(self)
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        Engine::subscribe(self)
    }
}
