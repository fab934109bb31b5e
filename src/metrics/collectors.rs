//! Recording façade over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code can
//! record unconditionally.

use super::prometheus::{
    ACTIVE_WORKERS, ALERTS_TOTAL, QUALITY_FILTERED, QUALITY_SCORE, QUEUE_DEPTH,
    RATE_LIMITED_TOTAL, TASKS_IN_PROGRESS, TASKS_TOTAL, TASK_DURATION,
};

/// Metrics collector for recording scheduler operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one processed task.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine type that executed the task
    /// * `status` - Outcome: "success", "retry" or "failure"
    /// * `duration_secs` - Pipeline duration in seconds
    pub fn record_task(&self, engine: &str, status: &str, duration_secs: f64) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[engine, status]).inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration
                .with_label_values(&[engine])
                .observe(duration_secs);
        }

        tracing::trace!(
            engine = engine,
            status = status,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    /// Record a quality score and whether it passed the gate.
    pub fn record_quality(&self, score: f64, passed: bool) {
        if let Some(quality_score) = QUALITY_SCORE.get() {
            quality_score.observe(score);
        }

        if !passed {
            if let Some(quality_filtered) = QUALITY_FILTERED.get() {
                quality_filtered.inc();
            }
        }

        tracing::trace!(score = score, passed = passed, "Recorded quality metric");
    }

    pub fn record_rate_limited(&self, engine: &str) {
        if let Some(rate_limited) = RATE_LIMITED_TOTAL.get() {
            rate_limited.with_label_values(&[engine]).inc();
        }
    }

    pub fn record_alert(&self, kind: &str) {
        if let Some(alerts) = ALERTS_TOTAL.get() {
            alerts.with_label_values(&[kind]).inc();
        }
    }

    /// Update the number of tasks waiting in a partition.
    pub fn update_queue_depth(&self, partition: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[partition])
                .set(depth as f64);
        }

        tracing::trace!(
            partition = partition,
            depth = depth,
            "Updated queue depth metric"
        );
    }

    /// Update the number of running workers of an engine.
    pub fn update_workers(&self, engine: &str, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers
                .with_label_values(&[engine])
                .set(count as f64);
        }

        tracing::trace!(engine = engine, count = count, "Updated active workers metric");
    }

    pub fn inc_tasks_in_progress(&self) {
        if let Some(in_progress) = TASKS_IN_PROGRESS.get() {
            in_progress.inc();
        }
    }

    pub fn dec_tasks_in_progress(&self) {
        if let Some(in_progress) = TASKS_IN_PROGRESS.get() {
            in_progress.dec();
        }
    }
}
