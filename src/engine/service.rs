//! Engine assembled from injected collaborator services.
//!
//! Channels such as blog comments or forum replies differ only in which
//! discovery, generation and submission services they use, so they share
//! this one implementation.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ContentGenerator, DiscoveryQuery, DiscoveryService, Engine, SubmissionService};
use crate::error::EngineError;
use crate::model::{
    ContentFormat, ContentRequest, ContentType, EngineTask, EngineType, GeneratedContent,
    PlacementOpportunity, SubmissionResult,
};

pub struct ServiceEngine {
    engine_type: EngineType,
    content_type: ContentType,
    format: ContentFormat,
    discovery: Arc<dyn DiscoveryService>,
    generator: Arc<dyn ContentGenerator>,
    submitter: Arc<dyn SubmissionService>,
}

impl ServiceEngine {
    pub fn new(
        engine_type: impl Into<EngineType>,
        discovery: Arc<dyn DiscoveryService>,
        generator: Arc<dyn ContentGenerator>,
        submitter: Arc<dyn SubmissionService>,
    ) -> Self {
        Self {
            engine_type: engine_type.into(),
            content_type: ContentType::Comment,
            format: ContentFormat::Html,
            discovery,
            generator,
            submitter,
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_format(mut self, format: ContentFormat) -> Self {
        self.format = format;
        self
    }
}

#[async_trait]
impl Engine for ServiceEngine {
    fn engine_type(&self) -> EngineType {
        self.engine_type.clone()
    }

    async fn discover(&self, task: &EngineTask) -> Result<Vec<PlacementOpportunity>, EngineError> {
        self.discovery.discover(&DiscoveryQuery::for_task(task)).await
    }

    async fn generate(
        &self,
        opportunity: &PlacementOpportunity,
        task: &EngineTask,
    ) -> Result<GeneratedContent, EngineError> {
        let request = ContentRequest::for_task(self.content_type, task, opportunity, self.format);
        let mut content = self.generator.generate(&request).await?;
        content.metadata.format = self.format;
        Ok(content)
    }

    async fn submit(
        &self,
        content: &GeneratedContent,
        opportunity: &PlacementOpportunity,
        _task: &EngineTask,
    ) -> Result<SubmissionResult, EngineError> {
        self.submitter.submit(content, opportunity).await
    }
}

impl std::fmt::Debug for ServiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEngine")
            .field("engine_type", &self.engine_type)
            .field("content_type", &self.content_type)
            .field("format", &self.format)
            .finish()
    }
}
