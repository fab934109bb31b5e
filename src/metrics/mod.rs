//! Prometheus-based monitoring for the placement scheduler.
//!
//! ```ignore
//! use placement_scheduler::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_task("web2_platforms", "success", 12.5);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, ALERTS_TOTAL, QUALITY_FILTERED, QUALITY_SCORE, QUEUE_DEPTH,
    RATE_LIMITED_TOTAL, REGISTRY, TASKS_IN_PROGRESS, TASKS_TOTAL, TASK_DURATION,
};
