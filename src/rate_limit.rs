//! Per-domain admission control for one engine type.
//!
//! Counters live in a shared [`CounterStore`] so that every worker process
//! sees the same state. The hourly window is a wall-clock bucket: the count
//! for 14:xx lives under a key ending in the `YYYYMMDDHH` of 14:00 and simply
//! stops being read at 15:00.
//!
//! A submission reserves its slot of the current hour right before it is
//! sent, with a single atomic increment-if-below on the store, so concurrent
//! workers can never push a domain past its cap. The slot stays consumed
//! whether the submission succeeds or not. Failures additionally extend a
//! consecutive-failure streak which opportunity scoring turns into an
//! exponential cost penalty.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeZone, Utc};
use tracing::debug;

use crate::error::StoreError;
use crate::model::EngineType;

/// Hourly count keys outlive their hour so late readers still see them.
const HOUR_BUCKET_TTL: Duration = Duration::from_secs(2 * 3600);
/// Failure streaks are forgotten after a quiet day.
const FAILURE_STREAK_TTL: Duration = Duration::from_secs(24 * 3600);
/// Cap on the streak exponent used for the cost penalty.
const MAX_PENALTY_EXPONENT: i64 = 5;

/// Atomic counters with expiry, shared by all workers.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments `key` and refreshes its TTL, returning the new value.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Increments `key` only while its value is below `limit`. Returns the new
    /// value, or `None` when the increment would reach past `limit`.
    async fn increment_if_below(
        &self,
        key: &str,
        limit: i64,
        ttl: Duration,
    ) -> Result<Option<i64>, StoreError>;

    /// Current value of `key`, zero when absent or expired.
    async fn get(&self, key: &str) -> Result<i64, StoreError>;

    /// Overwrites `key` with `value`.
    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError>;

    /// Deletes `key`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;
}

/// Hourly caps of one engine type.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    pub posts_per_hour: u32,
    /// Caps that replace `posts_per_hour` for specific domains.
    pub domain_limits: BTreeMap<String, u32>,
}

impl RateLimitPolicy {
    pub fn new(posts_per_hour: u32) -> Self {
        Self {
            posts_per_hour,
            domain_limits: BTreeMap::new(),
        }
    }

    pub fn with_domain_limit(mut self, domain: impl Into<String>, posts_per_hour: u32) -> Self {
        self.domain_limits
            .insert(normalize_domain(&domain.into()), posts_per_hour);
        self
    }

    pub fn limit_for(&self, domain: &str) -> u32 {
        self.domain_limits
            .get(&normalize_domain(domain))
            .copied()
            .unwrap_or(self.posts_per_hour)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Submissions already recorded in the current hour.
    pub count: u32,
    pub limit: u32,
    /// Start of the next hour when denied.
    pub retry_after: Option<DateTime<Utc>>,
}

/// Rate limiter for one engine type.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
    engine_type: EngineType,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        key_prefix: impl Into<String>,
        engine_type: EngineType,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            engine_type,
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn engine_type(&self) -> &EngineType {
        &self.engine_type
    }

    /// Checks whether `domain` may take another submission this hour.
    pub async fn check_limit(&self, domain: &str) -> Result<RateDecision, StoreError> {
        self.check_limit_at(domain, Utc::now()).await
    }

    pub async fn check_limit_at(
        &self,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        let limit = self.policy.limit_for(domain);
        let count = self.store.get(&self.hour_key(domain, now)).await?.max(0) as u32;

        if count < limit {
            return Ok(RateDecision {
                allowed: true,
                count,
                limit,
                retry_after: None,
            });
        }

        debug!(
            engine = %self.engine_type,
            domain = domain,
            count = count,
            limit = limit,
            "Hourly submission cap reached"
        );

        Ok(RateDecision {
            allowed: false,
            count,
            limit,
            retry_after: Some(next_hour(now)),
        })
    }

    /// Takes one submission slot of the current hour for `domain`, or denies
    /// it when the hour is full.
    pub async fn reserve(&self, domain: &str) -> Result<RateDecision, StoreError> {
        self.reserve_at(domain, Utc::now()).await
    }

    pub async fn reserve_at(
        &self,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        let limit = self.policy.limit_for(domain);
        let reserved = self
            .store
            .increment_if_below(&self.hour_key(domain, now), i64::from(limit), HOUR_BUCKET_TTL)
            .await?;

        let Some(count) = reserved else {
            debug!(
                engine = %self.engine_type,
                domain = domain,
                limit = limit,
                "Submission slot denied"
            );
            return Ok(RateDecision {
                allowed: false,
                count: limit,
                limit,
                retry_after: Some(next_hour(now)),
            });
        };

        self.store
            .set(
                &self.last_used_key(domain),
                now.timestamp_millis(),
                FAILURE_STREAK_TTL,
            )
            .await?;

        Ok(RateDecision {
            allowed: true,
            count: count.max(0) as u32,
            limit,
            retry_after: None,
        })
    }

    /// Clears the failure streak after a successful submission.
    pub async fn record_success(&self, domain: &str) -> Result<(), StoreError> {
        self.store.reset(&self.failure_key(domain)).await
    }

    /// Extends the failure streak after a failed submission.
    pub async fn record_failure(&self, domain: &str) -> Result<(), StoreError> {
        let streak = self
            .store
            .increment(&self.failure_key(domain), FAILURE_STREAK_TTL)
            .await?;
        debug!(
            engine = %self.engine_type,
            domain = domain,
            streak = streak,
            "Recorded submission failure"
        );
        Ok(())
    }

    /// Consecutive failures recorded for `domain`.
    pub async fn failure_streak(&self, domain: &str) -> Result<u32, StoreError> {
        let streak = self.store.get(&self.failure_key(domain)).await?;
        Ok(streak.max(0) as u32)
    }

    /// Multiplier applied to an opportunity's estimated cost: `2^min(streak, 5)`.
    pub async fn cost_multiplier(&self, domain: &str) -> Result<f64, StoreError> {
        let streak = self.failure_streak(domain).await? as i64;
        Ok(2f64.powi(streak.min(MAX_PENALTY_EXPONENT) as i32))
    }

    /// When `domain` last took a submission.
    pub async fn last_used(&self, domain: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let millis = self.store.get(&self.last_used_key(domain)).await?;
        if millis <= 0 {
            return Ok(None);
        }
        Ok(Utc.timestamp_millis_opt(millis).single())
    }

    fn base_key(&self, domain: &str) -> String {
        format!(
            "{}:rate:{}:{}",
            self.key_prefix,
            self.engine_type,
            normalize_domain(domain)
        )
    }

    fn hour_key(&self, domain: &str, now: DateTime<Utc>) -> String {
        format!("{}:{}", self.base_key(domain), now.format("%Y%m%d%H"))
    }

    fn failure_key(&self, domain: &str) -> String {
        format!("{}:failures", self.base_key(domain))
    }

    fn last_used_key(&self, domain: &str) -> String {
        format!("{}:last_used", self.base_key(domain))
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("key_prefix", &self.key_prefix)
            .field("engine_type", &self.engine_type)
            .field("policy", &self.policy)
            .finish()
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

/// Start of the wall-clock hour after `now`.
fn next_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    let hour = chrono::Duration::hours(1);
    now.duration_trunc(hour).unwrap_or(now) + hour
}
