//! In-process queue and counter store.
//!
//! Same semantics as the Redis store, with one mutex standing in for Redis'
//! single-threaded command execution. Used by tests and single-process runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{lease_duration, LeasedTask, PartitionCounters, PartitionKey, QueueStore};
use crate::error::StoreError;
use crate::model::EngineTask;
use crate::rate_limit::CounterStore;

#[derive(Debug, Default)]
struct PartitionState {
    /// Front is the oldest task.
    ready: VecDeque<String>,
    /// Due time and payload, kept sorted by due time.
    delayed: Vec<(DateTime<Utc>, String)>,
    /// Lease deadline and payload keyed by receipt.
    leases: HashMap<String, (DateTime<Utc>, String)>,
    counters: PartitionCounters,
}

impl PartitionState {
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        for (_, payload) in self.delayed.drain(..due) {
            self.ready.push_back(payload);
        }
    }

    fn enqueue(&mut self, payload: String, scheduled_for: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        match scheduled_for {
            Some(at) if at > now => {
                let idx = self.delayed.partition_point(|(due, _)| *due <= at);
                self.delayed.insert(idx, (at, payload));
            }
            _ => self.ready.push_back(payload),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    partitions: HashMap<PartitionKey, PartitionState>,
    /// Ids of every queued, delayed or leased task.
    task_ids: HashSet<Uuid>,
    counters: HashMap<String, (i64, Instant)>,
}

/// Queue and counter store held in memory.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push(&self, task: &EngineTask) -> Result<(), StoreError> {
        let payload = serde_json::to_string(task)?;
        let mut inner = self.lock();
        if !inner.task_ids.insert(task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        inner
            .partitions
            .entry(task.partition())
            .or_default()
            .enqueue(payload, task.scheduled_for, Utc::now());
        Ok(())
    }

    async fn pop(
        &self,
        partition: &PartitionKey,
        lease: Duration,
    ) -> Result<Option<LeasedTask>, StoreError> {
        let now = Utc::now();
        let mut inner = self.lock();
        let Some(state) = inner.partitions.get_mut(partition) else {
            return Ok(None);
        };

        state.promote_due(now);
        let Some(payload) = state.ready.pop_front() else {
            return Ok(None);
        };

        // An undecodable payload leaves the partition here.
        let task: EngineTask = serde_json::from_str(&payload)?;

        let receipt = Uuid::new_v4().to_string();
        let deadline = now + lease_duration(lease);
        state.leases.insert(receipt.clone(), (deadline, payload));

        Ok(Some(LeasedTask {
            task,
            partition: partition.clone(),
            receipt,
        }))
    }

    async fn ack(&self, leased: &LeasedTask) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let released = inner
            .partitions
            .get_mut(&leased.partition)
            .is_some_and(|state| state.leases.remove(&leased.receipt).is_some());
        if released {
            inner.task_ids.remove(&leased.task.id);
        }
        Ok(released)
    }

    async fn requeue(&self, leased: &LeasedTask, next: &EngineTask) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(next)?;
        let now = Utc::now();
        let mut inner = self.lock();

        let released = inner
            .partitions
            .get_mut(&leased.partition)
            .is_some_and(|state| state.leases.remove(&leased.receipt).is_some());
        if !released {
            return Ok(false);
        }

        inner.task_ids.remove(&leased.task.id);
        inner.task_ids.insert(next.id);
        inner
            .partitions
            .entry(next.partition())
            .or_default()
            .enqueue(payload, next.scheduled_for, now);
        Ok(true)
    }

    async fn len(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let inner = self.lock();
        Ok(inner
            .partitions
            .get(partition)
            .map_or(0, |state| state.ready.len() + state.delayed.len()))
    }

    async fn ready_len(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let now = Utc::now();
        let inner = self.lock();
        Ok(inner.partitions.get(partition).map_or(0, |state| {
            state.ready.len() + state.delayed.partition_point(|(at, _)| *at <= now)
        }))
    }

    async fn leased(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let inner = self.lock();
        Ok(inner
            .partitions
            .get(partition)
            .map_or(0, |state| state.leases.len()))
    }

    async fn reclaim_expired(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut inner = self.lock();
        let Some(state) = inner.partitions.get_mut(partition) else {
            return Ok(0);
        };

        let mut expired: Vec<(DateTime<Utc>, String)> = state
            .leases
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(receipt, (deadline, _))| (*deadline, receipt.clone()))
            .collect();
        expired.sort();

        for (_, receipt) in &expired {
            if let Some((_, payload)) = state.leases.remove(receipt) {
                state.ready.push_back(payload);
            }
        }
        Ok(expired.len())
    }

    async fn record_outcome(
        &self,
        partition: &PartitionKey,
        success: bool,
        duration_ms: u64,
    ) -> Result<PartitionCounters, StoreError> {
        let mut inner = self.lock();
        let state = inner.partitions.entry(partition.clone()).or_default();
        state.counters.record(success, duration_ms);
        Ok(state.counters)
    }

    async fn counters(&self, partition: &PartitionKey) -> Result<PartitionCounters, StoreError> {
        let inner = self.lock();
        Ok(inner
            .partitions
            .get(partition)
            .map(|state| state.counters)
            .unwrap_or_default())
    }
}

#[async_trait]
impl CounterStore for MemoryQueueStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        let entry = inner.counters.entry(key.to_string()).or_insert((0, now));
        if entry.1 <= now {
            entry.0 = 0;
        }
        entry.0 += 1;
        entry.1 = now + ttl;
        Ok(entry.0)
    }

    async fn increment_if_below(
        &self,
        key: &str,
        limit: i64,
        ttl: Duration,
    ) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        let entry = inner.counters.entry(key.to_string()).or_insert((0, now));
        if entry.1 <= now {
            entry.0 = 0;
        }
        if entry.0 >= limit {
            return Ok(None);
        }
        entry.0 += 1;
        entry.1 = now + ttl;
        Ok(Some(entry.0))
    }

    async fn get(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let inner = self.lock();
        Ok(inner
            .counters
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map_or(0, |(value, _)| *value))
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .counters
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.lock().counters.remove(key);
        Ok(())
    }
}
