//! Threshold alerts over queue metrics.
//!
//! Alerts are advisory: they are logged, counted and emitted as events, and
//! never throttle intake.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stats::QueueMetrics;
use crate::config::AlertThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    QueueLength,
    ProcessingTime,
    ErrorRate,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::QueueLength => "queue_length",
            AlertKind::ProcessingTime => "processing_time",
            AlertKind::ErrorRate => "error_rate",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric of one queue crossed its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    /// Partition key of the offending queue, as `engine:priority`.
    pub queue: String,
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
}

/// Compares every snapshot against `thresholds`.
///
/// Queue length counts due tasks only. Error rates are only judged once a
/// partition has processed something.
pub fn evaluate_alerts(
    stats: &[QueueMetrics],
    thresholds: &AlertThresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for metrics in stats {
        let mut raise = |kind, value: f64, threshold: f64| {
            alerts.push(Alert {
                kind,
                queue: metrics.partition.to_string(),
                value,
                threshold,
                raised_at: now,
            });
        };

        if metrics.ready > thresholds.queue_length {
            raise(
                AlertKind::QueueLength,
                metrics.ready as f64,
                thresholds.queue_length as f64,
            );
        }
        if metrics.avg_processing_ms > thresholds.processing_time_ms {
            raise(
                AlertKind::ProcessingTime,
                metrics.avg_processing_ms,
                thresholds.processing_time_ms,
            );
        }
        if metrics.processed() > 0 && metrics.error_rate() > thresholds.error_rate {
            raise(AlertKind::ErrorRate, metrics.error_rate(), thresholds.error_rate);
        }
    }

    alerts
}
