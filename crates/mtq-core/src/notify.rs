//! Outbound notification surface: pull snapshots plus a push stream of
//! terminal task events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::progress::AggregateSnapshot;
use crate::task::{TaskKey, TaskStatus};

/// Capacity of the event channel; slow subscribers lose the oldest events.
pub const EVENT_CAPACITY: usize = 256;

/// A task reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
    pub key: TaskKey,
    pub status: TaskStatus,
    pub file_size: u64,
    pub error: Option<String>,
    /// Unix ms.
    pub at: i64,
}

/// Fan-out of task events. Sending never blocks and never fails the sender.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

/// What dashboards and chat notifiers consume.
pub trait NotificationPort: Send + Sync {
    fn snapshot(&self) -> AggregateSnapshot;
    fn subscribe(&self) -> broadcast::Receiver<TaskEvent>;
}
