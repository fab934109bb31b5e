//! Submission and pipeline outcomes.
//!
//! `LinkPlacementResult` keeps its fields private so that a result is either a
//! success carrying a placement or a failure carrying an error, never both and
//! never neither.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::is_retryable_status;

use super::task::PlacementType;

/// Lifecycle status of a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStatus {
    Pending,
    Live,
    Rejected,
    Removed,
    Failed,
    VerificationPending,
}

/// Depth of the deferred verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    Basic,
    Standard,
    Premium,
}

/// Machine-readable error codes of terminal pipeline outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    NoOpportunities,
    OpportunitiesExhausted,
    AllPlatformsExhausted,
    SubmissionFailed,
    EngineError,
    EngineTimeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::NoOpportunities => "NO_OPPORTUNITIES",
            ErrorCode::OpportunitiesExhausted => "OPPORTUNITIES_EXHAUSTED",
            ErrorCode::AllPlatformsExhausted => "ALL_PLATFORMS_EXHAUSTED",
            ErrorCode::SubmissionFailed => "SUBMISSION_FAILED",
            ErrorCode::EngineError => "ENGINE_ERROR",
            ErrorCode::EngineTimeout => "ENGINE_TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a platform for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
}

impl SubmissionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    /// Classifies an HTTP status: 5xx, 408 and 429 are retryable.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(
            format!("HTTP_{}", status),
            message,
            is_retryable_status(status),
        )
    }
}

/// Outcome of one platform submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub success: bool,
    #[serde(default)]
    pub placement_url: Option<String>,
    #[serde(default)]
    pub submission_id: Option<String>,
    /// Hours until the platform is expected to approve the placement.
    #[serde(default)]
    pub estimated_approval_hours: Option<f64>,
    #[serde(default)]
    pub requires_moderation: bool,
    #[serde(default)]
    pub error: Option<SubmissionError>,
}

impl SubmissionResult {
    /// A placement that is live immediately.
    pub fn published(placement_url: impl Into<String>, submission_id: impl Into<String>) -> Self {
        Self {
            success: true,
            placement_url: Some(placement_url.into()),
            submission_id: Some(submission_id.into()),
            estimated_approval_hours: None,
            requires_moderation: false,
            error: None,
        }
    }

    /// A placement accepted into a moderation queue.
    pub fn pending_moderation(
        placement_url: impl Into<String>,
        submission_id: impl Into<String>,
        estimated_approval_hours: f64,
    ) -> Self {
        Self {
            requires_moderation: true,
            estimated_approval_hours: Some(estimated_approval_hours),
            ..Self::published(placement_url, submission_id)
        }
    }

    pub fn failed(error: SubmissionError) -> Self {
        Self {
            success: false,
            placement_url: None,
            submission_id: None,
            estimated_approval_hours: None,
            requires_moderation: false,
            error: Some(error),
        }
    }
}

/// The realized link placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub source_url: String,
    pub source_domain: String,
    pub target_url: String,
    pub anchor_text: String,
    pub placement_type: PlacementType,
    pub status: PlacementStatus,
    pub domain_authority: f64,
    pub page_authority: f64,
    /// 0 to 100.
    pub quality_score: f64,
    pub cost: f64,
    pub placement_date: DateTime<Utc>,
    #[serde(default)]
    pub verification_scheduled: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engine_data: serde_json::Value,
    #[serde(default)]
    pub content_snippet: String,
}

/// Error attached to a failed pipeline outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
}

impl ResultError {
    pub fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, at: DateTime<Utc>) -> Self {
        self.retry_after = Some(at);
        self
    }
}

/// Why one opportunity did not produce a placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityFailure {
    pub domain: String,
    pub reason: String,
    pub retryable: bool,
}

/// Execution metrics of one pipeline run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineMetrics {
    pub processing_time_ms: u64,
    /// Number of opportunities tried.
    pub attempts_count: u32,
    pub resources_used: Vec<String>,
    pub diagnostics: Vec<OpportunityFailure>,
}

/// Top-level outcome of running a task through an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPlacementResult {
    success: bool,
    #[serde(default)]
    placement: Option<Placement>,
    #[serde(default)]
    error: Option<ResultError>,
    metrics: PipelineMetrics,
}

impl LinkPlacementResult {
    pub fn success(placement: Placement, metrics: PipelineMetrics) -> Self {
        Self {
            success: true,
            placement: Some(placement),
            error: None,
            metrics,
        }
    }

    pub fn failure(error: ResultError, metrics: PipelineMetrics) -> Self {
        Self {
            success: false,
            placement: None,
            error: Some(error),
            metrics,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    pub fn placement_mut(&mut self) -> Option<&mut Placement> {
        self.placement.as_mut()
    }

    pub fn error(&self) -> Option<&ResultError> {
        self.error.as_ref()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn set_processing_time(&mut self, processing_time_ms: u64) {
        self.metrics.processing_time_ms = processing_time_ms;
    }

    /// Whether a failed result may be retried. Successes are never retried.
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }

    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        self.error.as_ref().and_then(|e| e.retry_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_placement() -> Placement {
        Placement {
            source_url: "https://medium.com/@a/post".to_string(),
            source_domain: "medium".to_string(),
            target_url: "https://example.com".to_string(),
            anchor_text: "example".to_string(),
            placement_type: PlacementType::Web2Post,
            status: PlacementStatus::Live,
            domain_authority: 96.0,
            page_authority: 91.0,
            quality_score: 80.0,
            cost: 6.6,
            placement_date: Utc::now(),
            verification_scheduled: None,
            engine_data: serde_json::Value::Null,
            content_snippet: String::new(),
        }
    }

    #[test]
    fn test_success_and_failure_are_exclusive() {
        let ok = LinkPlacementResult::success(create_test_placement(), PipelineMetrics::default());
        assert!(ok.is_success());
        assert!(ok.placement().is_some());
        assert!(ok.error().is_none());
        assert!(!ok.is_retryable());

        let err = LinkPlacementResult::failure(
            ResultError::new(ErrorCode::NoOpportunities, "none", true),
            PipelineMetrics::default(),
        );
        assert!(!err.is_success());
        assert!(err.placement().is_none());
        assert_eq!(err.error().map(|e| e.code), Some(ErrorCode::NoOpportunities));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::AllPlatformsExhausted)
            .expect("serialization should work");
        assert_eq!(json, "\"ALL_PLATFORMS_EXHAUSTED\"");
        assert_eq!(ErrorCode::NoOpportunities.to_string(), "NO_OPPORTUNITIES");
    }

    #[test]
    fn test_submission_error_from_status() {
        let err = SubmissionError::from_status(503, "unavailable");
        assert_eq!(err.code, "HTTP_503");
        assert!(err.retryable);

        let err = SubmissionError::from_status(401, "bad token");
        assert!(!err.retryable);
    }

    #[test]
    fn test_pending_moderation_result() {
        let result = SubmissionResult::pending_moderation("https://a.io/p", "42", 6.0);
        assert!(result.success);
        assert!(result.requires_moderation);
        assert_eq!(result.estimated_approval_hours, Some(6.0));
        assert_eq!(result.submission_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_result_json_shape() {
        let result = LinkPlacementResult::failure(
            ResultError::new(ErrorCode::ValidationFailed, "anchor too short", false),
            PipelineMetrics::default(),
        );
        let value = serde_json::to_value(&result).expect("serialization should work");

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(value["error"]["retryable"], false);
        assert!(value["placement"].is_null());
        assert!(value["metrics"]["processingTimeMs"].is_u64());
    }
}
