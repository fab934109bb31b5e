//! Scheduler notifications for external subscribers.
//!
//! Events travel over a `tokio::sync::broadcast` channel. Emitting never
//! blocks and never fails; a subscriber that falls behind by more than the
//! channel capacity misses the oldest events.

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::alerts::Alert;
use super::stats::QueueMetrics;
use crate::model::{EngineType, ResultError};

/// Something observable happened inside the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    TaskAdded {
        task_id: Uuid,
        partition: String,
    },
    TaskCompleted {
        task_id: Uuid,
        worker_id: String,
        engine_type: EngineType,
        processing_time_ms: u64,
        placement_url: String,
    },
    TaskFailed {
        task_id: Uuid,
        worker_id: String,
        engine_type: EngineType,
        error: ResultError,
        will_retry: bool,
    },
    TaskRetried {
        task_id: Uuid,
        attempts: u32,
        scheduled_for: DateTime<Utc>,
    },
    WorkerError {
        worker_id: String,
        engine_type: EngineType,
        message: String,
    },
    Alert(Alert),
    MetricsUpdated {
        stats: Vec<QueueMetrics>,
    },
    WorkersScaled {
        engine_type: EngineType,
        from: usize,
        to: usize,
    },
}

impl SchedulerEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerEvent::TaskAdded { .. } => "task_added",
            SchedulerEvent::TaskCompleted { .. } => "task_completed",
            SchedulerEvent::TaskFailed { .. } => "task_failed",
            SchedulerEvent::TaskRetried { .. } => "task_retried",
            SchedulerEvent::WorkerError { .. } => "worker_error",
            SchedulerEvent::Alert(_) => "alert",
            SchedulerEvent::MetricsUpdated { .. } => "metrics_updated",
            SchedulerEvent::WorkersScaled { .. } => "workers_scaled",
        }
    }
}

/// Fan-out of scheduler events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Delivers `event` to current subscribers, if any.
    pub fn emit(&self, event: SchedulerEvent) {
        tracing::trace!(event = event.kind(), "Emitting scheduler event");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    /// Events as a stream, skipping over any missed because of lag.
    pub fn stream(&self) -> impl Stream<Item = SchedulerEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|event| async move { event.ok() })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
