//! Redis-backed queue and counter store.
//!
//! # Key Layout
//!
//! For a partition `{engine}:{priority}` under prefix `{prefix}`:
//!
//! - `{prefix}:queue:{engine}:{priority}`: list of ready tasks (LPUSH / RPOP, FIFO)
//! - `{prefix}:queue:{engine}:{priority}:delayed`: sorted set of tasks scored by due time
//! - `{prefix}:queue:{engine}:{priority}:leases`: sorted set of lease receipts scored by deadline
//! - `{prefix}:queue:{engine}:{priority}:leased`: hash of lease receipt to task payload
//! - `{prefix}:queue:{engine}:{priority}:stats`: hash with `completed`, `failed`, `avg_time_ms`
//! - `{prefix}:task_ids`: set of ids of every queued, delayed or leased task
//!
//! Multi-key operations run as Lua scripts so each one is atomic on the server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};
use uuid::Uuid;

use super::{lease_duration, LeasedTask, PartitionCounters, PartitionKey, QueueStore};
use crate::error::StoreError;
use crate::model::EngineTask;
use crate::rate_limit::CounterStore;

/// Enqueues a task unless its id is already known.
///
/// KEYS: task ids, ready, delayed. ARGV: id, payload, due (ms), now (ms).
const PUSH_SCRIPT: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
  return 0
end
if tonumber(ARGV[3]) > tonumber(ARGV[4]) then
  redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
else
  redis.call('LPUSH', KEYS[2], ARGV[2])
end
return 1
"#;

/// Promotes due delayed tasks, pops the oldest ready task and leases it.
///
/// KEYS: ready, delayed, leases, leased payloads. ARGV: now (ms), lease
/// deadline (ms), receipt.
const POP_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, member in ipairs(due) do
  redis.call('ZREM', KEYS[2], member)
  redis.call('LPUSH', KEYS[1], member)
end
local task = redis.call('RPOP', KEYS[1])
if task then
  redis.call('ZADD', KEYS[3], ARGV[2], ARGV[3])
  redis.call('HSET', KEYS[4], ARGV[3], task)
end
return task
"#;

/// Releases a lease and forgets its task id.
///
/// KEYS: leases, leased payloads, task ids. ARGV: receipt, id.
const ACK_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('SREM', KEYS[3], ARGV[2])
return 1
"#;

/// Releases a lease and enqueues the next attempt.
///
/// KEYS: leases, leased payloads, ready, delayed, task ids. ARGV: receipt,
/// payload, due (ms), now (ms), released id, next id.
const REQUEUE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('SREM', KEYS[5], ARGV[5])
redis.call('SADD', KEYS[5], ARGV[6])
if tonumber(ARGV[3]) > tonumber(ARGV[4]) then
  redis.call('ZADD', KEYS[4], ARGV[3], ARGV[2])
else
  redis.call('LPUSH', KEYS[3], ARGV[2])
end
return 1
"#;

/// Moves expired leases back to the tail of the ready list.
///
/// KEYS: leases, leased payloads, ready. ARGV: now (ms).
const RECLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, receipt in ipairs(expired) do
  local task = redis.call('HGET', KEYS[2], receipt)
  redis.call('ZREM', KEYS[1], receipt)
  redis.call('HDEL', KEYS[2], receipt)
  if task then
    redis.call('LPUSH', KEYS[3], task)
  end
end
return #expired
"#;

/// Counts one outcome and folds its duration into the running average.
///
/// KEYS: stats. ARGV: success (1/0), duration (ms).
const OUTCOME_SCRIPT: &str = r#"
local field = 'failed'
if ARGV[1] == '1' then field = 'completed' end
redis.call('HINCRBY', KEYS[1], field, 1)
local completed = tonumber(redis.call('HGET', KEYS[1], 'completed') or '0')
local failed = tonumber(redis.call('HGET', KEYS[1], 'failed') or '0')
local n = completed + failed
local old = tonumber(redis.call('HGET', KEYS[1], 'avg_time_ms') or '0')
local avg = (old * (n - 1) + tonumber(ARGV[2])) / n
redis.call('HSET', KEYS[1], 'avg_time_ms', tostring(avg))
return {completed, failed, tostring(avg)}
"#;

/// Increments a counter unless it already reached the limit.
///
/// KEYS: counter. ARGV: limit, ttl (s).
const INCREMENT_BELOW_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
  return false
end
local value = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return value
"#;

/// Queue and counter store backed by Redis.
pub struct RedisQueueStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    key_prefix: String,
    push_script: redis::Script,
    pop_script: redis::Script,
    ack_script: redis::Script,
    requeue_script: redis::Script,
    reclaim_script: redis::Script,
    outcome_script: redis::Script,
    increment_below_script: redis::Script,
}

impl RedisQueueStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!(prefix = key_prefix, "Connected to Redis queue store");
        Ok(Self::from_connection(redis, key_prefix))
    }

    /// Creates a store from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.to_string(),
            push_script: redis::Script::new(PUSH_SCRIPT),
            pop_script: redis::Script::new(POP_SCRIPT),
            ack_script: redis::Script::new(ACK_SCRIPT),
            requeue_script: redis::Script::new(REQUEUE_SCRIPT),
            reclaim_script: redis::Script::new(RECLAIM_SCRIPT),
            outcome_script: redis::Script::new(OUTCOME_SCRIPT),
            increment_below_script: redis::Script::new(INCREMENT_BELOW_SCRIPT),
        }
    }

    fn ready_key(&self, partition: &PartitionKey) -> String {
        format!(
            "{}:queue:{}:{}",
            self.key_prefix, partition.engine_type, partition.priority
        )
    }

    fn delayed_key(&self, partition: &PartitionKey) -> String {
        format!("{}:delayed", self.ready_key(partition))
    }

    fn leases_key(&self, partition: &PartitionKey) -> String {
        format!("{}:leases", self.ready_key(partition))
    }

    fn leased_payloads_key(&self, partition: &PartitionKey) -> String {
        format!("{}:leased", self.ready_key(partition))
    }

    fn task_ids_key(&self) -> String {
        format!("{}:task_ids", self.key_prefix)
    }

    fn stats_key(&self, partition: &PartitionKey) -> String {
        format!("{}:stats", self.ready_key(partition))
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn push(&self, task: &EngineTask) -> Result<(), StoreError> {
        let partition = task.partition();
        let payload = serde_json::to_string(task)?;
        let due = task.scheduled_for.map_or(0, |at| at.timestamp_millis());
        let mut conn = self.redis.clone();

        let pushed: i64 = self
            .push_script
            .key(self.task_ids_key())
            .key(self.ready_key(&partition))
            .key(self.delayed_key(&partition))
            .arg(task.id.to_string())
            .arg(payload)
            .arg(due)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if pushed == 0 {
            return Err(StoreError::DuplicateTask(task.id));
        }

        debug!(task_id = %task.id, partition = %partition, "Pushed task");
        Ok(())
    }

    async fn pop(
        &self,
        partition: &PartitionKey,
        lease: Duration,
    ) -> Result<Option<LeasedTask>, StoreError> {
        let now = Utc::now();
        let deadline = now + lease_duration(lease);
        let receipt = Uuid::new_v4().to_string();
        let mut conn = self.redis.clone();

        let payload: Option<String> = self
            .pop_script
            .key(self.ready_key(partition))
            .key(self.delayed_key(partition))
            .key(self.leases_key(partition))
            .key(self.leased_payloads_key(partition))
            .arg(now.timestamp_millis())
            .arg(deadline.timestamp_millis())
            .arg(&receipt)
            .invoke_async(&mut conn)
            .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let task = match serde_json::from_str::<EngineTask>(&payload) {
            Ok(task) => task,
            Err(e) => {
                redis::pipe()
                    .atomic()
                    .zrem(self.leases_key(partition), &receipt)
                    .hdel(self.leased_payloads_key(partition), &receipt)
                    .query_async::<_, ()>(&mut conn)
                    .await?;
                return Err(e.into());
            }
        };

        Ok(Some(LeasedTask {
            task,
            partition: partition.clone(),
            receipt,
        }))
    }

    async fn ack(&self, leased: &LeasedTask) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let removed: i64 = self
            .ack_script
            .key(self.leases_key(&leased.partition))
            .key(self.leased_payloads_key(&leased.partition))
            .key(self.task_ids_key())
            .arg(&leased.receipt)
            .arg(leased.task.id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn requeue(&self, leased: &LeasedTask, next: &EngineTask) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(next)?;
        let due = next.scheduled_for.map_or(0, |at| at.timestamp_millis());
        let target = next.partition();
        let mut conn = self.redis.clone();

        let requeued: i64 = self
            .requeue_script
            .key(self.leases_key(&leased.partition))
            .key(self.leased_payloads_key(&leased.partition))
            .key(self.ready_key(&target))
            .key(self.delayed_key(&target))
            .key(self.task_ids_key())
            .arg(&leased.receipt)
            .arg(payload)
            .arg(due)
            .arg(Utc::now().timestamp_millis())
            .arg(leased.task.id.to_string())
            .arg(next.id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(requeued == 1)
    }

    async fn len(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let (ready, delayed): (usize, usize) = redis::pipe()
            .llen(self.ready_key(partition))
            .zcard(self.delayed_key(partition))
            .query_async(&mut conn)
            .await?;
        Ok(ready + delayed)
    }

    async fn ready_len(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let (ready, due): (usize, usize) = redis::pipe()
            .llen(self.ready_key(partition))
            .zcount(self.delayed_key(partition), "-inf", Utc::now().timestamp_millis())
            .query_async(&mut conn)
            .await?;
        Ok(ready + due)
    }

    async fn leased(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let leased: usize = conn.zcard(self.leases_key(partition)).await?;
        Ok(leased)
    }

    async fn reclaim_expired(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let reclaimed: usize = self
            .reclaim_script
            .key(self.leases_key(partition))
            .key(self.leased_payloads_key(partition))
            .key(self.ready_key(partition))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if reclaimed > 0 {
            info!(partition = %partition, reclaimed = reclaimed, "Reclaimed expired leases");
        }
        Ok(reclaimed)
    }

    async fn record_outcome(
        &self,
        partition: &PartitionKey,
        success: bool,
        duration_ms: u64,
    ) -> Result<PartitionCounters, StoreError> {
        let mut conn = self.redis.clone();
        let (completed, failed, avg): (u64, u64, String) = self
            .outcome_script
            .key(self.stats_key(partition))
            .arg(if success { 1 } else { 0 })
            .arg(duration_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(PartitionCounters {
            completed,
            failed,
            avg_time_ms: parse_avg(&avg)?,
        })
    }

    async fn counters(&self, partition: &PartitionKey) -> Result<PartitionCounters, StoreError> {
        let mut conn = self.redis.clone();
        let (completed, failed, avg): (Option<u64>, Option<u64>, Option<String>) = redis::pipe()
            .hget(self.stats_key(partition), "completed")
            .hget(self.stats_key(partition), "failed")
            .hget(self.stats_key(partition), "avg_time_ms")
            .query_async(&mut conn)
            .await?;

        Ok(PartitionCounters {
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
            avg_time_ms: avg.as_deref().map(parse_avg).transpose()?.unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl CounterStore for RedisQueueStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn increment_if_below(
        &self,
        key: &str,
        limit: i64,
        ttl: Duration,
    ) -> Result<Option<i64>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<i64> = self
            .increment_below_script
            .key(key)
            .arg(limit)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn get(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

fn parse_avg(raw: &str) -> Result<f64, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::UnexpectedResponse(format!("invalid avg_time_ms '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_avg() {
        assert_eq!(parse_avg("1500").expect("parse"), 1500.0);
        assert_eq!(parse_avg("12.5").expect("parse"), 12.5);
        assert!(parse_avg("nan-ish").is_err());
    }
}
