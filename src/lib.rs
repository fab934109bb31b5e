//! placement-scheduler: a priority-partitioned scheduler for link placement
//! engines.
//!
//! Tasks are queued per `(engine type, priority)` partition, picked up by
//! per-engine worker pools and run through a shared engine pipeline:
//! discovery, content generation, quality gating, submission and
//! verification scheduling, all under per-domain rate limits.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod rate_limit;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use config::{EngineSettings, SchedulerConfig};
pub use error::{ConfigError, EngineError, ManagerError, StoreError};
pub use scheduler::{QueueManager, SchedulerEvent};
