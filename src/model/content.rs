//! Generated content and the requests that produce it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::opportunity::PlacementOpportunity;
use super::task::{ContentLength, ContentTone, EngineTask};

/// Markup format of generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    #[default]
    Html,
    Markdown,
    Text,
}

impl ContentFormat {
    /// Renders a link in this format.
    pub fn link(&self, anchor_text: &str, url: &str) -> String {
        match self {
            ContentFormat::Html => format!("<a href=\"{}\">{}</a>", url, anchor_text),
            ContentFormat::Markdown => format!("[{}]({})", anchor_text, url),
            ContentFormat::Text => format!("{} ({})", anchor_text, url),
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentFormat::Html => "html",
            ContentFormat::Markdown => "markdown",
            ContentFormat::Text => "text",
        };
        write!(f, "{}", name)
    }
}

/// Kind of content requested from the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Article,
    Comment,
    ForumReply,
    Profile,
}

/// Input to the content-generation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub content_type: ContentType,
    pub topic: String,
    pub keywords: Vec<String>,
    pub tone: ContentTone,
    pub length: ContentLength,
    /// Free-form context: the placing site, platform, niche.
    pub context: String,
    pub format: ContentFormat,
    pub target_url: String,
    pub anchor_text: String,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl ContentRequest {
    /// Builds a request for placing `task` on `opportunity`.
    pub fn for_task(
        content_type: ContentType,
        task: &EngineTask,
        opportunity: &PlacementOpportunity,
        format: ContentFormat,
    ) -> Self {
        let topic = task
            .primary_keyword()
            .unwrap_or(task.anchor_text.as_str())
            .to_string();
        let mut context = format!("{} ({})", opportunity.domain, opportunity.url);
        if !task.niche.is_empty() {
            context.push_str(&format!("; niche: {}", task.niche.join(", ")));
        }

        Self {
            content_type,
            topic,
            keywords: task.keywords.clone(),
            tone: task.requirements.content_tone,
            length: task.requirements.content_length,
            context,
            format,
            target_url: task.target_url.clone(),
            anchor_text: task.anchor_text.clone(),
            min_length: None,
            platform: None,
        }
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// Descriptive metadata attached to generated content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentMetadata {
    pub word_count: usize,
    pub quality_score: f64,
    pub readability_score: f64,
    /// -1.0 (negative) to 1.0 (positive).
    pub sentiment: f64,
    pub keyword_density: f64,
    pub keywords: Vec<String>,
    pub format: ContentFormat,
    pub platform: Option<String>,
}

/// Where the anchor ended up inside the content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlacementInstructions {
    /// Character offset of the rendered link.
    pub anchor_offset: Option<usize>,
    pub surrounding_context: String,
}

/// Content produced by the generation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: ContentMetadata,
    #[serde(default)]
    pub placement_instructions: PlacementInstructions,
}

impl GeneratedContent {
    /// Wraps raw content, filling in the word count.
    pub fn new(content: impl Into<String>, format: ContentFormat) -> Self {
        let content = content.into();
        let word_count = content.split_whitespace().count();
        Self {
            title: None,
            content,
            metadata: ContentMetadata {
                word_count,
                format,
                ..Default::default()
            },
            placement_instructions: PlacementInstructions::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// First `max_chars` characters, with an ellipsis when truncated.
    pub fn snippet(&self, max_chars: usize) -> String {
        let mut snippet: String = self.content.chars().take(max_chars).collect();
        if self.content.chars().count() > max_chars {
            snippet.push_str("...");
        }
        snippet
    }
}

/// Score returned by the quality-assessment collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityAssessment {
    /// Overall score, 0.0 to 1.0.
    pub score: f64,
    pub readability: f64,
    pub relevance: f64,
    pub originality: f64,
    pub issues: Vec<String>,
}

impl QualityAssessment {
    pub fn new(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    pub fn passes(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}
