//! Shared value types of the placement scheduler.
//!
//! Tasks flow through the queue store, opportunities and generated content
//! live only inside one pipeline run, and results are what workers report.

pub mod content;
pub mod opportunity;
pub mod result;
pub mod task;

pub use content::{
    ContentFormat, ContentMetadata, ContentRequest, ContentType, GeneratedContent,
    PlacementInstructions, QualityAssessment,
};
pub use opportunity::PlacementOpportunity;
pub use result::{
    ErrorCode, LinkPlacementResult, OpportunityFailure, PipelineMetrics, Placement,
    PlacementStatus, ResultError, SubmissionError, SubmissionResult, VerificationLevel,
};
pub use task::{
    ContentLength, ContentTone, EngineTask, EngineType, PartitionKey, PlacementType, Priority,
    TaskRequirements,
};
