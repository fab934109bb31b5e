//! Scheduler configuration.
//!
//! Configuration comes from defaults, an optional YAML file, and `PLACEMENT_*`
//! environment variables, applied in that order. Per-engine settings (worker
//! counts, retry policy, rate limits) live under `engines`, keyed by engine type.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::EngineType;

/// How the delay before a retry grows with the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Always wait `retry_delay`.
    #[default]
    Fixed,
    /// Wait `retry_delay * 2^attempts`, capped at `max_delay_secs`.
    Exponential { max_delay_secs: u64 },
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempts` previous retries.
    pub fn delay(&self, base: Duration, attempts: u32) -> Duration {
        match self {
            RetryPolicy::Fixed => base,
            RetryPolicy::Exponential { max_delay_secs } => {
                let factor = 2u32.saturating_pow(attempts.min(16));
                base.saturating_mul(factor)
                    .min(Duration::from_secs(*max_delay_secs))
            }
        }
    }
}

/// Settings for one engine type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound on workers for this engine.
    pub max_concurrency: usize,
    /// Workers started by `QueueManager::start`; defaults to `max_concurrency`.
    pub initial_workers: Option<usize>,
    /// Retries allowed before a retryable failure becomes terminal.
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub retry_policy: RetryPolicy,
    /// Wait before retrying a task that found no usable opportunity.
    pub cooldown_secs: u64,
    /// Hourly submission cap per domain.
    pub posts_per_hour: u32,
    /// Per-domain overrides of `posts_per_hour`.
    pub domain_limits: BTreeMap<String, u32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            initial_workers: None,
            retry_attempts: 3,
            retry_delay_secs: 300,
            retry_policy: RetryPolicy::Fixed,
            cooldown_secs: 3600,
            posts_per_hour: 10,
            domain_limits: BTreeMap::new(),
        }
    }
}

impl EngineSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Workers to start with, within `1..=max_concurrency`.
    pub fn startup_workers(&self) -> usize {
        self.initial_workers
            .unwrap_or(self.max_concurrency)
            .clamp(1, self.max_concurrency.max(1))
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_initial_workers(mut self, workers: usize) -> Self {
        self.initial_workers = Some(workers);
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_secs = delay.as_secs();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = cooldown.as_secs();
        self
    }

    pub fn with_posts_per_hour(mut self, posts: u32) -> Self {
        self.posts_per_hour = posts;
        self
    }

    pub fn with_domain_limit(mut self, domain: impl Into<String>, posts: u32) -> Self {
        self.domain_limits.insert(domain.into(), posts);
        self
    }
}

/// Thresholds that raise advisory alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Tasks waiting in one partition.
    pub queue_length: usize,
    /// Average processing time of one partition, in milliseconds.
    pub processing_time_ms: f64,
    /// Failed share of processed tasks, in percent.
    pub error_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            queue_length: 100,
            processing_time_ms: 60_000.0,
            error_rate: 25.0,
        }
    }
}

/// Configuration for the queue manager, its workers and the queue store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Prefix of every Redis key written by the scheduler.
    pub key_prefix: String,
    pub monitoring_interval_secs: u64,
    /// Sleep after an empty poll across all partitions.
    pub idle_poll_interval_ms: u64,
    /// Pause after an unexpected pipeline or store failure.
    pub error_backoff_ms: u64,
    /// Lease on a popped task; also bounds one pipeline execution.
    pub lease_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Minimum quality score (0.0-1.0) for content to be submitted.
    pub quality_threshold: f64,
    /// Buffer of the event broadcast channel.
    pub event_capacity: usize,
    pub alert_thresholds: AlertThresholds,
    pub engines: BTreeMap<String, EngineSettings>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "placement".to_string(),
            monitoring_interval_secs: 30,
            idle_poll_interval_ms: 1000,
            error_backoff_ms: 5000,
            lease_timeout_secs: 1800, // 30 minutes
            shutdown_timeout_secs: 60,
            quality_threshold: 0.7,
            event_capacity: 1024,
            alert_thresholds: AlertThresholds::default(),
            engines: BTreeMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PLACEMENT_REDIS_URL` (or `REDIS_URL`): Redis URL (default: redis://localhost:6379)
    /// - `PLACEMENT_KEY_PREFIX`: Redis key prefix (default: placement)
    /// - `PLACEMENT_MONITORING_INTERVAL_SECS`: Monitoring tick (default: 30)
    /// - `PLACEMENT_IDLE_POLL_MS`: Sleep after an empty poll (default: 1000)
    /// - `PLACEMENT_ERROR_BACKOFF_MS`: Pause after a worker error (default: 5000)
    /// - `PLACEMENT_LEASE_TIMEOUT_SECS`: Task lease and execution bound (default: 1800)
    /// - `PLACEMENT_SHUTDOWN_TIMEOUT_SECS`: Graceful drain limit (default: 60)
    /// - `PLACEMENT_QUALITY_THRESHOLD`: Content quality gate (default: 0.7)
    /// - `PLACEMENT_ALERT_QUEUE_LENGTH`: Queue length alert (default: 100)
    /// - `PLACEMENT_ALERT_PROCESSING_TIME_MS`: Processing time alert (default: 60000)
    /// - `PLACEMENT_ALERT_ERROR_RATE`: Error rate alert in percent (default: 25)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML configuration file, then applies environment overrides.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: SchedulerConfig = serde_yaml::from_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `PLACEMENT_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("PLACEMENT_REDIS_URL").or_else(|| lookup("REDIS_URL")) {
            self.redis_url = val;
        }

        if let Some(val) = lookup("PLACEMENT_KEY_PREFIX") {
            self.key_prefix = val;
        }

        if let Some(val) = lookup("PLACEMENT_MONITORING_INTERVAL_SECS") {
            self.monitoring_interval_secs =
                parse_env_value(&val, "PLACEMENT_MONITORING_INTERVAL_SECS")?;
        }

        if let Some(val) = lookup("PLACEMENT_IDLE_POLL_MS") {
            self.idle_poll_interval_ms = parse_env_value(&val, "PLACEMENT_IDLE_POLL_MS")?;
        }

        if let Some(val) = lookup("PLACEMENT_ERROR_BACKOFF_MS") {
            self.error_backoff_ms = parse_env_value(&val, "PLACEMENT_ERROR_BACKOFF_MS")?;
        }

        if let Some(val) = lookup("PLACEMENT_LEASE_TIMEOUT_SECS") {
            self.lease_timeout_secs = parse_env_value(&val, "PLACEMENT_LEASE_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("PLACEMENT_SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout_secs =
                parse_env_value(&val, "PLACEMENT_SHUTDOWN_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("PLACEMENT_QUALITY_THRESHOLD") {
            self.quality_threshold = parse_env_value(&val, "PLACEMENT_QUALITY_THRESHOLD")?;
        }

        // Alert thresholds
        if let Some(val) = lookup("PLACEMENT_ALERT_QUEUE_LENGTH") {
            self.alert_thresholds.queue_length =
                parse_env_value(&val, "PLACEMENT_ALERT_QUEUE_LENGTH")?;
        }

        if let Some(val) = lookup("PLACEMENT_ALERT_PROCESSING_TIME_MS") {
            self.alert_thresholds.processing_time_ms =
                parse_env_value(&val, "PLACEMENT_ALERT_PROCESSING_TIME_MS")?;
        }

        if let Some(val) = lookup("PLACEMENT_ALERT_ERROR_RATE") {
            self.alert_thresholds.error_rate =
                parse_env_value(&val, "PLACEMENT_ALERT_ERROR_RATE")?;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.key_prefix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "key_prefix cannot be empty".to_string(),
            ));
        }

        if self.monitoring_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "monitoring_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.lease_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "lease_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::ValidationFailed(
                "quality_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "event_capacity must be greater than 0".to_string(),
            ));
        }

        for (engine, settings) in &self.engines {
            if settings.max_concurrency == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "engines.{}.max_concurrency must be greater than 0",
                    engine
                )));
            }

            if settings.posts_per_hour == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "engines.{}.posts_per_hour must be greater than 0",
                    engine
                )));
            }
        }

        Ok(())
    }

    /// Settings of `engine_type`, or the defaults when it is not configured.
    pub fn engine_settings(&self, engine_type: &EngineType) -> EngineSettings {
        self.engines
            .get(engine_type.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the Redis key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Builder method to set the sleep after an empty poll.
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method to set the pause after a worker error.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Builder method to set the task lease timeout.
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout_secs = timeout.as_secs();
        self
    }

    /// Builder method to set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_secs = timeout.as_secs();
        self
    }

    /// Builder method to set the quality gate.
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    /// Builder method to set alert thresholds.
    pub fn with_alert_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.alert_thresholds = thresholds;
        self
    }

    /// Builder method to configure one engine type.
    pub fn with_engine(mut self, engine_type: impl Into<String>, settings: EngineSettings) -> Self {
        self.engines.insert(engine_type.into(), settings);
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.idle_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.error_backoff(), Duration::from_secs(5));
        assert_eq!(config.lease_timeout(), Duration::from_secs(1800));
        assert!((config.quality_threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_settings_defaults() {
        let config = SchedulerConfig::default();
        let settings = config.engine_settings(&EngineType::new("unknown"));
        assert_eq!(settings.retry_attempts, 3);
        assert_eq!(settings.retry_delay(), Duration::from_secs(300));
        assert_eq!(settings.cooldown(), Duration::from_secs(3600));
        assert_eq!(settings.startup_workers(), 4);
    }

    #[test]
    fn test_startup_workers_clamped() {
        let settings = EngineSettings::default()
            .with_max_concurrency(3)
            .with_initial_workers(10);
        assert_eq!(settings.startup_workers(), 3);

        let settings = EngineSettings::default().with_initial_workers(0);
        assert_eq!(settings.startup_workers(), 1);
    }

    #[test]
    fn test_retry_policy_delays() {
        let base = Duration::from_secs(60);
        assert_eq!(RetryPolicy::Fixed.delay(base, 5), base);

        let policy = RetryPolicy::Exponential {
            max_delay_secs: 600,
        };
        assert_eq!(policy.delay(base, 0), Duration::from_secs(60));
        assert_eq!(policy.delay(base, 2), Duration::from_secs(240));
        assert_eq!(policy.delay(base, 10), Duration::from_secs(600));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache:6380"),
            ("PLACEMENT_IDLE_POLL_MS", "250"),
            ("PLACEMENT_ALERT_ERROR_RATE", "10.5"),
        ]
        .into_iter()
        .collect();

        let mut config = SchedulerConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("overrides should apply");

        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(config.idle_poll_interval(), Duration::from_millis(250));
        assert!((config.alert_thresholds.error_rate - 10.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = SchedulerConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "PLACEMENT_LEASE_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("PLACEMENT_LEASE_TIMEOUT_SECS"));
    }

    #[test]
    fn test_validation_invalid_quality_threshold() {
        let config = SchedulerConfig::default().with_quality_threshold(1.5);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("quality_threshold"));
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let config = SchedulerConfig::default()
            .with_engine("blog_comments", EngineSettings::default().with_max_concurrency(0));
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("engines.blog_comments.max_concurrency"));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
key_prefix: backlinks
quality_threshold: 0.75
alert_thresholds:
  queue_length: 50
engines:
  web2_platforms:
    max_concurrency: 15
    retry_attempts: 5
    retry_policy:
      kind: exponential
      max_delay_secs: 7200
    domain_limits:
      medium: 3
"#
        )
        .expect("write config");

        let config = SchedulerConfig::from_yaml_file(file.path()).expect("config should load");
        assert_eq!(config.key_prefix, "backlinks");
        assert!((config.quality_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.alert_thresholds.queue_length, 50);
        assert_eq!(config.alert_thresholds.error_rate, 25.0);

        let web2 = config.engine_settings(&EngineType::new("web2_platforms"));
        assert_eq!(web2.max_concurrency, 15);
        assert_eq!(web2.retry_attempts, 5);
        assert_eq!(
            web2.retry_policy,
            RetryPolicy::Exponential {
                max_delay_secs: 7200
            }
        );
        assert_eq!(web2.domain_limits.get("medium"), Some(&3));
        assert_eq!(web2.posts_per_hour, 10);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));
    }
}
