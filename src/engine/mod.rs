//! Placement engines and the pipeline that drives them.
//!
//! An [`Engine`] knows how to discover opportunities, generate content and
//! submit it for one placement channel. [`EngineRuntime`] runs the shared
//! pipeline around it:
//!
//! ```text
//! validate -> discover -> for each opportunity: generate -> quality gate -> submit
//!          -> post-process (verification, rate limiter feedback)
//! ```
//!
//! Engines never call each other and hold no global state; the set of engines
//! is handed to the queue manager at construction.

pub mod anchor;
pub mod pipeline;
pub mod scoring;
pub mod service;
pub mod web2;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::model::{
    ContentRequest, EngineTask, EngineType, ErrorCode, GeneratedContent, PlacementOpportunity,
    PlacementType, QualityAssessment, SubmissionResult, VerificationLevel,
};
use crate::rate_limit::RateLimitPolicy;

pub use anchor::{insert_anchor, AnchorPlacement, AnchorStrategy};
pub use pipeline::{EngineRuntime, Validation};
pub use scoring::{opportunity_score, rank_opportunities};
pub use service::ServiceEngine;
pub use web2::{PlatformConfig, PlatformPost, PlatformPublisher, Web2PlatformsEngine};

/// A pluggable placement strategy for one channel.
#[async_trait]
pub trait Engine: Send + Sync {
    fn engine_type(&self) -> EngineType;

    /// Code reported when every discovered opportunity failed.
    fn exhausted_code(&self) -> ErrorCode {
        ErrorCode::OpportunitiesExhausted
    }

    /// Engine-specific validation errors, checked after the common ones.
    fn validate(&self, _task: &EngineTask) -> Vec<String> {
        Vec::new()
    }

    /// Hourly caps for this engine's rate limiter.
    fn rate_limit_policy(&self, settings: &EngineSettings) -> RateLimitPolicy {
        let mut policy = RateLimitPolicy::new(settings.posts_per_hour);
        for (domain, limit) in &settings.domain_limits {
            policy = policy.with_domain_limit(domain.clone(), *limit);
        }
        policy
    }

    /// Candidate opportunities for `task`, in any order.
    async fn discover(&self, task: &EngineTask) -> Result<Vec<PlacementOpportunity>, EngineError>;

    /// Content for placing `task` on `opportunity`.
    async fn generate(
        &self,
        opportunity: &PlacementOpportunity,
        task: &EngineTask,
    ) -> Result<GeneratedContent, EngineError>;

    /// Platform-specific rewriting, applied after the link was inserted.
    fn rewrite(
        &self,
        content: GeneratedContent,
        _opportunity: &PlacementOpportunity,
        _task: &EngineTask,
    ) -> Result<GeneratedContent, EngineError> {
        Ok(content)
    }

    async fn submit(
        &self,
        content: &GeneratedContent,
        opportunity: &PlacementOpportunity,
        task: &EngineTask,
    ) -> Result<SubmissionResult, EngineError>;
}

/// Constraints passed to a discovery service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryQuery {
    pub engine_type: EngineType,
    pub keywords: Vec<String>,
    pub niche: Vec<String>,
    pub min_domain_authority: Option<f64>,
    pub max_cost: f64,
    pub placement_types: Vec<PlacementType>,
    pub language: String,
}

impl DiscoveryQuery {
    pub fn for_task(task: &EngineTask) -> Self {
        Self {
            engine_type: task.engine_type.clone(),
            keywords: task.keywords.clone(),
            niche: task.niche.clone(),
            min_domain_authority: task.requirements.min_domain_authority,
            max_cost: task.requirements.max_cost_per_link,
            placement_types: task.requirements.placement_types.clone(),
            language: task.requirements.language.clone(),
        }
    }
}

/// Finds candidate placement sites.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    async fn discover(
        &self,
        query: &DiscoveryQuery,
    ) -> Result<Vec<PlacementOpportunity>, EngineError>;
}

/// Produces content; the generation model itself is a black box.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, EngineError>;
}

/// Scores generated content between 0.0 and 1.0.
#[async_trait]
pub trait QualityAssessor: Send + Sync {
    async fn assess(
        &self,
        content: &GeneratedContent,
        task: &EngineTask,
    ) -> Result<QualityAssessment, EngineError>;
}

/// Submits content to the site behind an opportunity.
#[async_trait]
pub trait SubmissionService: Send + Sync {
    async fn submit(
        &self,
        content: &GeneratedContent,
        opportunity: &PlacementOpportunity,
    ) -> Result<SubmissionResult, EngineError>;
}

/// A deferred check that a placement went (and stayed) live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub placement_id: String,
    pub verification_date: DateTime<Utc>,
    pub verification_level: VerificationLevel,
    pub placement_url: String,
    pub target_url: String,
}

#[async_trait]
pub trait VerificationScheduler: Send + Sync {
    async fn schedule(&self, request: VerificationRequest) -> Result<(), EngineError>;
}

/// Assessor that trusts the scores the generator attached to its content.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataQualityAssessor;

#[async_trait]
impl QualityAssessor for MetadataQualityAssessor {
    async fn assess(
        &self,
        content: &GeneratedContent,
        _task: &EngineTask,
    ) -> Result<QualityAssessment, EngineError> {
        let mut assessment = QualityAssessment::new(content.metadata.quality_score);
        assessment.readability = content.metadata.readability_score;
        if content.metadata.word_count == 0 {
            assessment.score = 0.0;
            assessment.issues.push("content is empty".to_string());
        }
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentFormat;

    #[tokio::test]
    async fn test_metadata_assessor_uses_generator_scores() {
        let mut content = GeneratedContent::new("some useful words", ContentFormat::Text);
        content.metadata.quality_score = 0.82;
        content.metadata.readability_score = 0.6;
        let task = EngineTask::new("c", "u", "blog_comments", "https://t.io", "anchor");

        let assessment = MetadataQualityAssessor
            .assess(&content, &task)
            .await
            .expect("assessment");
        assert!((assessment.score - 0.82).abs() < f64::EPSILON);
        assert!((assessment.readability - 0.6).abs() < f64::EPSILON);
        assert!(assessment.issues.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_assessor_rejects_empty_content() {
        let mut content = GeneratedContent::new("   ", ContentFormat::Text);
        content.metadata.quality_score = 0.9;
        let task = EngineTask::new("c", "u", "blog_comments", "https://t.io", "anchor");

        let assessment = MetadataQualityAssessor
            .assess(&content, &task)
            .await
            .expect("assessment");
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.issues.len(), 1);
    }

    #[test]
    fn test_discovery_query_from_task() {
        let task = EngineTask::new("c", "u", "blog_comments", "https://t.io", "anchor")
            .with_keywords(["seo"])
            .with_niche(["marketing"]);
        let query = DiscoveryQuery::for_task(&task);

        assert_eq!(query.engine_type.as_str(), "blog_comments");
        assert_eq!(query.keywords, vec!["seo".to_string()]);
        assert_eq!(query.max_cost, 50.0);
        assert_eq!(query.language, "en");
    }
}
