//! Error types for the placement scheduler.
//!
//! Defines the error types for every subsystem:
//! - Queue and counter store access (Redis or in-memory)
//! - Engine collaborators (discovery, generation, quality, submission, verification)
//! - Configuration loading and validation
//! - Queue manager lifecycle

use std::time::Duration;

use thiserror::Error;

use crate::model::ErrorCode;

/// Returns whether an HTTP status reported by a platform is worth retrying.
///
/// Server errors, request timeouts and rate limiting are transient; every
/// other client error (401, 403, 422, ...) needs the task to change first.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Errors that can occur while talking to the queue or counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to serialize or deserialize a task.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A task with this id is already queued or leased.
    #[error("Task {0} is already queued")]
    DuplicateTask(uuid::Uuid),

    /// The store returned something the scheduler cannot interpret.
    #[error("Unexpected store response: {0}")]
    UnexpectedResponse(String),
}

/// Errors raised by an engine or one of its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Opportunity discovery failed.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Content generation failed.
    #[error("Content generation failed: {0}")]
    Generation(String),

    /// Quality assessment failed.
    #[error("Quality assessment failed: {0}")]
    Quality(String),

    /// A platform rejected or failed the submission.
    #[error("Submission failed{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Submission {
        status: Option<u16>,
        message: String,
    },

    /// Scheduling the verification check failed.
    #[error("Verification scheduling failed: {0}")]
    Verification(String),

    /// The engine is misconfigured (unknown platform, missing publisher, ...).
    #[error("Engine configuration error: {0}")]
    Configuration(String),

    /// Store access failed while executing the pipeline.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Creates a submission error from an HTTP status.
    pub fn submission(status: u16, message: impl Into<String>) -> Self {
        EngineError::Submission {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Returns whether the failure may go away on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Submission {
                status: Some(status),
                ..
            } => is_retryable_status(*status),
            EngineError::Configuration(_) => false,
            _ => true,
        }
    }

    /// Machine-readable code reported when this error ends a pipeline run.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Submission { .. } => ErrorCode::SubmissionFailed,
            _ => ErrorCode::EngineError,
        }
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable or field has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur in the queue manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Manager is already running.
    #[error("Queue manager is already running")]
    AlreadyRunning,

    /// Manager is not running.
    #[error("Queue manager is not running")]
    NotRunning,

    /// No engine is registered for the task's engine type.
    #[error("No engine registered for engine type '{0}'")]
    UnknownEngine(String),

    /// Workers did not drain within the shutdown timeout.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// Queue store failure.
    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(408));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(422));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn test_engine_error_retryability() {
        assert!(EngineError::submission(502, "bad gateway").is_retryable());
        assert!(!EngineError::submission(401, "unauthorized").is_retryable());
        assert!(EngineError::Generation("model overloaded".to_string()).is_retryable());
        assert!(!EngineError::Configuration("no publisher".to_string()).is_retryable());
        assert!(EngineError::Submission {
            status: None,
            message: "connection reset".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::submission(422, "invalid body");
        assert_eq!(err.to_string(), "Submission failed (HTTP 422): invalid body");

        let err = EngineError::Submission {
            status: None,
            message: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "Submission failed: timeout");
    }

    #[test]
    fn test_engine_error_codes() {
        assert_eq!(
            EngineError::submission(500, "boom").code(),
            ErrorCode::SubmissionFailed
        );
        assert_eq!(
            EngineError::Discovery("down".to_string()).code(),
            ErrorCode::EngineError
        );
    }

    #[test]
    fn test_manager_error_display() {
        let err = ManagerError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = ManagerError::UnknownEngine("blog_comments".to_string());
        assert!(err.to_string().contains("blog_comments"));

        let err = ManagerError::ShutdownTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));
    }
}
