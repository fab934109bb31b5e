//! Shared queue and counter storage.
//!
//! Tasks are queued per [`PartitionKey`] (engine type + priority). Every
//! mutation is atomic at the store level so that independent workers, in one
//! process or many, never pop the same task twice.
//!
//! # Leases
//!
//! `pop` does not delete a task: it moves it into the partition's lease set
//! with a deadline. A worker that finishes calls `ack` (or `requeue` to
//! schedule a retry). Leases whose deadline passed belong to crashed workers;
//! `reclaim_expired` puts those tasks back at the tail of their partition.
//! Every pop issues a fresh receipt, so a late `ack` from a worker whose
//! lease was reclaimed cannot release the lease of the next worker.
//!
//! A task id is known to the store from `push` until its final `ack`; pushing
//! a known id fails with [`StoreError::DuplicateTask`].
//!
//! # Delayed tasks
//!
//! A task whose `scheduled_for` lies in the future waits in a delayed set and
//! is moved to the tail of its partition once due, so it never overtakes
//! tasks that were already waiting.

mod memory;
mod redis_queue;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::EngineTask;

pub use crate::model::PartitionKey;
pub use memory::MemoryQueueStore;
pub use redis_queue::RedisQueueStore;

/// A task popped from a partition and held under a lease.
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedTask {
    pub task: EngineTask,
    pub partition: PartitionKey,
    /// Opaque handle identifying the lease in the store.
    pub receipt: String,
}

/// Processing counters of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PartitionCounters {
    pub completed: u64,
    pub failed: u64,
    /// Running average over all processed tasks, in milliseconds.
    pub avg_time_ms: f64,
}

impl PartitionCounters {
    pub fn total(&self) -> u64 {
        self.completed + self.failed
    }

    /// `completed / (completed + failed) * 100`, zero before any processing.
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.completed as f64 / total as f64 * 100.0,
        }
    }

    /// Failed share in percent, zero before any processing.
    pub fn error_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.failed as f64 / total as f64 * 100.0,
        }
    }

    /// Applies one outcome: `newAvg = (oldAvg * (n - 1) + latest) / n`.
    pub fn record(&mut self, success: bool, duration_ms: u64) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        let n = self.total() as f64;
        self.avg_time_ms = (self.avg_time_ms * (n - 1.0) + duration_ms as f64) / n;
    }
}

/// Converts a lease length into a deadline offset, saturating at one year.
fn lease_duration(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Ordered, partitioned task storage with consume-once pops.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends `task` to its partition, or to the delayed set when its
    /// `scheduled_for` is in the future. Fails with
    /// [`StoreError::DuplicateTask`] while a task with the same id is queued
    /// or leased.
    async fn push(&self, task: &EngineTask) -> Result<(), StoreError>;

    /// Pops the oldest due task of `partition` and leases it for `lease`.
    async fn pop(
        &self,
        partition: &PartitionKey,
        lease: Duration,
    ) -> Result<Option<LeasedTask>, StoreError>;

    /// Releases a finished task. Returns `false` if the lease had already
    /// expired and been reclaimed.
    async fn ack(&self, leased: &LeasedTask) -> Result<bool, StoreError>;

    /// Atomically releases `leased` and enqueues `next` in its place.
    /// Returns `false`, enqueuing nothing, if the lease was already reclaimed.
    async fn requeue(&self, leased: &LeasedTask, next: &EngineTask) -> Result<bool, StoreError>;

    /// Tasks waiting in `partition`, delayed ones included.
    async fn len(&self, partition: &PartitionKey) -> Result<usize, StoreError>;

    /// Tasks of `partition` a worker could pop right now.
    async fn ready_len(&self, partition: &PartitionKey) -> Result<usize, StoreError>;

    /// Tasks of `partition` currently leased to a worker.
    async fn leased(&self, partition: &PartitionKey) -> Result<usize, StoreError>;

    /// Returns tasks with expired leases to the tail of `partition`.
    async fn reclaim_expired(&self, partition: &PartitionKey) -> Result<usize, StoreError>;

    /// Atomically records one processed task and returns the new counters.
    async fn record_outcome(
        &self,
        partition: &PartitionKey,
        success: bool,
        duration_ms: u64,
    ) -> Result<PartitionCounters, StoreError>;

    async fn counters(&self, partition: &PartitionKey) -> Result<PartitionCounters, StoreError>;
}
