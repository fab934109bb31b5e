//! Per-partition queue snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{PartitionCounters, PartitionKey};

/// Snapshot of one partition, recomputed on every monitoring tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub partition: PartitionKey,
    /// Waiting tasks, delayed retries included.
    pub queue_length: usize,
    /// Waiting tasks that are already due.
    pub ready: usize,
    /// Tasks currently leased to workers.
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub avg_processing_ms: f64,
    /// Percent of processed tasks that succeeded.
    pub success_rate: f64,
    pub last_updated: DateTime<Utc>,
}

impl QueueMetrics {
    pub fn new(
        partition: PartitionKey,
        queue_length: usize,
        ready: usize,
        active: usize,
        counters: PartitionCounters,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            partition,
            queue_length,
            ready,
            active,
            completed: counters.completed,
            failed: counters.failed,
            avg_processing_ms: counters.avg_time_ms,
            success_rate: counters.success_rate(),
            last_updated: now,
        }
    }

    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Percent of processed tasks that failed.
    pub fn error_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            total => self.failed as f64 / total as f64 * 100.0,
        }
    }
}
