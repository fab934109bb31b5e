//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the placement scheduler
//! and provides functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus registry for all scheduler metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of processed tasks, labeled by engine and status.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Pipeline duration in seconds, labeled by engine.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of tasks waiting, labeled by partition.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of tasks currently being executed.
pub static TASKS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of running workers, labeled by engine.
pub static ACTIVE_WORKERS: OnceLock<GaugeVec> = OnceLock::new();

/// Distribution of content quality scores.
pub static QUALITY_SCORE: OnceLock<Histogram> = OnceLock::new();

/// Total generated contents rejected by the quality gate.
pub static QUALITY_FILTERED: OnceLock<Counter> = OnceLock::new();

/// Total admissions denied by the rate limiter, labeled by engine.
pub static RATE_LIMITED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total alerts raised, labeled by kind.
pub static ALERTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Serializes concurrent `init_metrics` calls.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording through `MetricsCollector` before this is a
/// no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Task metrics
    let tasks_total = CounterVec::new(
        Opts::new("placement_tasks_total", "Total number of processed tasks"),
        &["engine", "status"],
    )?;

    let task_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "placement_task_duration_seconds",
            "Pipeline execution duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 1800.0]),
        &["engine"],
    )?;

    let tasks_in_progress = Gauge::new(
        "placement_tasks_in_progress",
        "Number of tasks currently being executed",
    )?;

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("placement_queue_depth", "Number of tasks waiting per partition"),
        &["partition"],
    )?;

    let active_workers = GaugeVec::new(
        Opts::new("placement_active_workers", "Number of running workers"),
        &["engine"],
    )?;

    // Quality metrics
    let quality_score = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "placement_quality_score",
            "Distribution of content quality scores",
        )
        .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
    )?;

    let quality_filtered = Counter::new(
        "placement_quality_filtered_total",
        "Total generated contents rejected by the quality gate",
    )?;

    // Admission and alerting
    let rate_limited_total = CounterVec::new(
        Opts::new(
            "placement_rate_limited_total",
            "Total admissions denied by the rate limiter",
        ),
        &["engine"],
    )?;

    let alerts_total = CounterVec::new(
        Opts::new("placement_alerts_total", "Total alerts raised"),
        &["kind"],
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(tasks_in_progress.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(quality_score.clone()))?;
    registry.register(Box::new(quality_filtered.clone()))?;
    registry.register(Box::new(rate_limited_total.clone()))?;
    registry.register(Box::new(alerts_total.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = TASKS_IN_PROGRESS.set(tasks_in_progress);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = QUALITY_SCORE.set(quality_score);
    let _ = QUALITY_FILTERED.set(quality_filtered);
    let _ = RATE_LIMITED_TOTAL.set(rate_limited_total);
    let _ = ALERTS_TOTAL.set(alerts_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line instead when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        // First call should succeed or metrics already initialized
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_metrics_after_init() {
        let _ = init_metrics();

        if let Some(counter) = TASKS_TOTAL.get() {
            counter.with_label_values(&["web2_platforms", "success"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("placement_tasks_total"));
    }
}
