//! Web 2.0 platform engine.
//!
//! Publishes full articles on hosted blogging platforms (WordPress.com,
//! Medium, dev.to, Hashnode, Ghost, Telegraph). Every enabled platform with a
//! registered publisher is one opportunity; the opportunity's `domain` is the
//! platform id, so per-platform hourly caps are ordinary domain limits of the
//! rate limiter.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ContentGenerator, Engine};
use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::model::{
    ContentFormat, ContentRequest, ContentType, EngineTask, EngineType, ErrorCode,
    GeneratedContent, PlacementOpportunity, PlacementType, SubmissionResult,
};
use crate::rate_limit::RateLimitPolicy;

pub const ENGINE_TYPE: &str = "web2_platforms";

/// Platforms below this suitability are not offered.
const MIN_SUITABILITY: f64 = 0.3;
/// How long a discovered platform opportunity stays valid.
const OPPORTUNITY_TTL_HOURS: i64 = 24;
const DESCRIPTION_CHARS: usize = 150;
const MAX_DEVTO_TAGS: usize = 4;

const TECHNOLOGY_TERMS: &[&str] = &[
    "javascript", "python", "react", "node", "api", "database", "web",
];
const BUSINESS_TERMS: &[&str] = &["marketing", "seo", "business", "strategy", "growth"];

static MARKDOWN_HEADING_RE: OnceLock<Regex> = OnceLock::new();
static HTML_HEADING_RE: OnceLock<Regex> = OnceLock::new();
static TOP_HEADING_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();

fn markdown_heading_re() -> &'static Regex {
    MARKDOWN_HEADING_RE
        .get_or_init(|| Regex::new(r"(?m)^(#{1,5}) ").expect("Invalid regex for markdown headings"))
}

fn html_heading_re() -> &'static Regex {
    HTML_HEADING_RE
        .get_or_init(|| Regex::new(r"<(/?)h([1-5])>").expect("Invalid regex for html headings"))
}

fn top_heading_re() -> &'static Regex {
    TOP_HEADING_RE.get_or_init(|| Regex::new(r"(?m)^# ").expect("Invalid regex for top headings"))
}

fn tag_re() -> &'static Regex {
    TAG_RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("Invalid regex for markup tags"))
}

/// Static description of one hosted platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub domain_authority: f64,
    #[serde(default)]
    pub base_url: Option<String>,
    pub posts_per_hour: u32,
    pub posts_per_day: u32,
    /// Minimum article length in words.
    pub min_content_length: usize,
    /// Accepted formats, most preferred first.
    pub supported_formats: Vec<ContentFormat>,
    pub requires_authentication: bool,
    pub allows_anonymous: bool,
}

impl PlatformConfig {
    #[allow(clippy::too_many_arguments)]
    fn builtin(
        id: &str,
        name: &str,
        domain_authority: f64,
        base_url: &str,
        posts_per_hour: u32,
        posts_per_day: u32,
        min_content_length: usize,
        supported_formats: &[ContentFormat],
        requires_authentication: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            domain_authority,
            base_url: Some(base_url.to_string()),
            posts_per_hour,
            posts_per_day,
            min_content_length,
            supported_formats: supported_formats.to_vec(),
            requires_authentication,
            allows_anonymous: !requires_authentication,
        }
    }

    /// The six platforms supported out of the box.
    pub fn defaults() -> Vec<PlatformConfig> {
        use ContentFormat::{Html, Markdown};
        vec![
            Self::builtin("wordpress", "WordPress.com", 85.0, "https://wordpress.com", 5, 20, 300, &[Html, Markdown], true),
            Self::builtin("medium", "Medium", 96.0, "https://medium.com", 3, 10, 400, &[Markdown, Html], true),
            Self::builtin("devto", "DEV Community", 90.0, "https://dev.to", 4, 15, 350, &[Markdown], true),
            Self::builtin("hashnode", "Hashnode", 88.0, "https://hashnode.com", 4, 12, 400, &[Markdown], true),
            Self::builtin("ghost", "Ghost", 85.0, "https://ghost.org", 6, 25, 300, &[Html, Markdown], true),
            Self::builtin("telegraph", "Telegraph", 91.0, "https://telegra.ph", 10, 50, 200, &[Html], false),
        ]
    }

    pub fn url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.com", self.id))
    }

    /// Estimated cost of one post, growing with authority.
    pub fn estimated_cost(&self) -> f64 {
        (2.0 + (self.domain_authority - 50.0) * 0.1).max(1.0)
    }

    /// Difficulty 0..=100 from authentication, length and daily cap.
    pub fn difficulty(&self) -> f64 {
        let mut difficulty = 20.0;
        if self.requires_authentication {
            difficulty += 30.0;
        }
        if self.min_content_length > 400 {
            difficulty += 20.0;
        }
        if self.posts_per_day < 10 {
            difficulty += 15.0;
        }
        f64::min(difficulty, 100.0)
    }

    /// How well the platform fits the task, 0.0 to 1.0.
    pub fn suitability(&self, task: &EngineTask) -> f64 {
        let mut score = 0.5 + self.domain_authority / 100.0 * 0.3;
        if task.requirements.content_length.word_target() >= self.min_content_length {
            score += 0.2;
        }
        score.min(1.0)
    }

    /// Format to request from the generator.
    pub fn preferred_format(&self) -> ContentFormat {
        match self.id.as_str() {
            "devto" | "hashnode" => ContentFormat::Markdown,
            _ if self.supported_formats.contains(&ContentFormat::Html) => ContentFormat::Html,
            _ => self
                .supported_formats
                .first()
                .copied()
                .unwrap_or(ContentFormat::Html),
        }
    }
}

/// An article ready to be published on a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPost {
    pub title: String,
    pub content: String,
    pub format: ContentFormat,
    pub tags: Vec<String>,
    pub canonical_url: Option<String>,
    pub publish_immediately: bool,
    pub description: String,
    pub category: String,
}

/// Client for one platform's publishing API.
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    /// Whether the client holds credentials for the platform.
    fn has_credentials(&self) -> bool {
        true
    }

    async fn publish(&self, post: &PlatformPost) -> Result<SubmissionResult, EngineError>;
}

pub struct Web2PlatformsEngine {
    platforms: RwLock<Vec<PlatformConfig>>,
    publishers: HashMap<String, Arc<dyn PlatformPublisher>>,
    generator: Arc<dyn ContentGenerator>,
}

impl Web2PlatformsEngine {
    /// Creates the engine with the default platforms and no publishers.
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            platforms: RwLock::new(PlatformConfig::defaults()),
            publishers: HashMap::new(),
            generator,
        }
    }

    /// Replaces the platform list.
    pub fn with_platforms(self, platforms: Vec<PlatformConfig>) -> Self {
        *self.platforms.write().unwrap_or_else(|e| e.into_inner()) = platforms;
        self
    }

    /// Registers the API client for `platform_id`.
    pub fn with_publisher(
        mut self,
        platform_id: impl Into<String>,
        publisher: Arc<dyn PlatformPublisher>,
    ) -> Self {
        self.publishers.insert(platform_id.into(), publisher);
        self
    }

    pub fn platform_configs(&self) -> Vec<PlatformConfig> {
        self.platforms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn platform(&self, platform_id: &str) -> Option<PlatformConfig> {
        self.platforms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.id == platform_id)
            .cloned()
    }

    /// Applies `update` to a platform. Returns false for unknown ids.
    ///
    /// Hourly caps are read when the engine's runtime is built, so changes to
    /// `posts_per_hour` apply from the next runtime.
    pub fn update_platform(&self, platform_id: &str, update: impl FnOnce(&mut PlatformConfig)) -> bool {
        let mut platforms = self.platforms.write().unwrap_or_else(|e| e.into_inner());
        match platforms.iter_mut().find(|p| p.id == platform_id) {
            Some(platform) => {
                update(platform);
                true
            }
            None => false,
        }
    }

    pub fn enable_platform(&self, platform_id: &str) -> bool {
        self.update_platform(platform_id, |p| p.enabled = true)
    }

    pub fn disable_platform(&self, platform_id: &str) -> bool {
        self.update_platform(platform_id, |p| p.enabled = false)
    }

    fn platform_for(&self, opportunity: &PlacementOpportunity) -> Result<PlatformConfig, EngineError> {
        self.platform(&opportunity.domain).ok_or_else(|| {
            EngineError::Configuration(format!("Unknown platform '{}'", opportunity.domain))
        })
    }

    fn publisher_for(&self, platform_id: &str) -> Result<&Arc<dyn PlatformPublisher>, EngineError> {
        self.publishers.get(platform_id).ok_or_else(|| {
            EngineError::Configuration(format!("No publisher registered for '{}'", platform_id))
        })
    }

    fn opportunity(&self, platform: &PlatformConfig, suitability: f64) -> PlacementOpportunity {
        let now = Utc::now();
        PlacementOpportunity::new(platform.id.clone(), platform.url(), PlacementType::Web2Post)
            .with_authority(platform.domain_authority, platform.domain_authority - 5.0)
            .with_cost(platform.estimated_cost())
            .with_difficulty(platform.difficulty())
            .with_requirements(json!({
                "platform": platform.id,
                "minContentLength": platform.min_content_length,
                "supportedFormats": platform.supported_formats,
                "authentication": platform.requires_authentication,
                "anonymous": platform.allows_anonymous,
                "suitabilityScore": suitability,
            }))
            .discovered_at(now)
            .expires_at(now + Duration::hours(OPPORTUNITY_TTL_HOURS))
    }
}

#[async_trait]
impl Engine for Web2PlatformsEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::new(ENGINE_TYPE)
    }

    fn exhausted_code(&self) -> ErrorCode {
        ErrorCode::AllPlatformsExhausted
    }

    /// Each platform's own hourly cap, overridden by configured domain limits.
    fn rate_limit_policy(&self, settings: &EngineSettings) -> RateLimitPolicy {
        let mut policy = RateLimitPolicy::new(settings.posts_per_hour);
        for platform in self.platform_configs() {
            policy = policy.with_domain_limit(platform.id, platform.posts_per_hour);
        }
        for (domain, limit) in &settings.domain_limits {
            policy = policy.with_domain_limit(domain.clone(), *limit);
        }
        policy
    }

    async fn discover(&self, task: &EngineTask) -> Result<Vec<PlacementOpportunity>, EngineError> {
        let requirements = &task.requirements;
        let mut opportunities = Vec::new();

        for platform in self.platform_configs() {
            if !platform.enabled {
                continue;
            }
            if platform.estimated_cost() > requirements.max_cost_per_link {
                continue;
            }
            if requirements
                .min_domain_authority
                .is_some_and(|min| platform.domain_authority < min)
            {
                continue;
            }

            let Some(publisher) = self.publishers.get(&platform.id) else {
                debug!(platform = %platform.id, "No publisher registered, skipping platform");
                continue;
            };
            if platform.requires_authentication && !publisher.has_credentials() {
                debug!(platform = %platform.id, "Publisher has no credentials, skipping platform");
                continue;
            }

            let suitability = platform.suitability(task);
            if suitability < MIN_SUITABILITY {
                continue;
            }

            opportunities.push(self.opportunity(&platform, suitability));
        }

        Ok(opportunities)
    }

    async fn generate(
        &self,
        opportunity: &PlacementOpportunity,
        task: &EngineTask,
    ) -> Result<GeneratedContent, EngineError> {
        let platform = self.platform_for(opportunity)?;
        let format = platform.preferred_format();

        let request = ContentRequest::for_task(ContentType::Article, task, opportunity, format)
            .with_min_length(platform.min_content_length)
            .with_platform(platform.id.clone());

        let mut content = self.generator.generate(&request).await?;
        content.metadata.format = format;
        content.metadata.platform = Some(platform.id);
        if content.title.is_none() {
            content.title = Some(post_title(task));
        }
        Ok(content)
    }

    fn rewrite(
        &self,
        mut content: GeneratedContent,
        opportunity: &PlacementOpportunity,
        task: &EngineTask,
    ) -> Result<GeneratedContent, EngineError> {
        let keyword = task.primary_keyword().unwrap_or(task.anchor_text.as_str());
        let format = content.metadata.format;

        content.content = match opportunity.domain.as_str() {
            "medium" => rewrite_for_medium(&content.content, keyword, format),
            "devto" => rewrite_for_devto(&content.content, keyword, &task.keywords),
            "hashnode" => rewrite_for_hashnode(&content.content, keyword),
            "telegraph" => rewrite_for_telegraph(&content.content),
            _ => content.content,
        };
        Ok(content)
    }

    async fn submit(
        &self,
        content: &GeneratedContent,
        opportunity: &PlacementOpportunity,
        task: &EngineTask,
    ) -> Result<SubmissionResult, EngineError> {
        let platform = self.platform_for(opportunity)?;
        let publisher = self.publisher_for(&platform.id)?;

        let post = PlatformPost {
            title: content.title.clone().unwrap_or_else(|| post_title(task)),
            content: content.content.clone(),
            format: content.metadata.format,
            tags: task.keywords.clone(),
            canonical_url: Some(task.target_url.clone()),
            publish_immediately: true,
            description: description(&content.content),
            category: infer_category(&task.keywords).to_string(),
        };

        debug!(platform = %platform.id, title = %post.title, "Publishing post");
        publisher.publish(&post).await
    }
}

impl std::fmt::Debug for Web2PlatformsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut publishers: Vec<&String> = self.publishers.keys().collect();
        publishers.sort();
        f.debug_struct("Web2PlatformsEngine")
            .field("platforms", &self.platform_configs())
            .field("publishers", &publishers)
            .finish()
    }
}

/// Title derived from the task's primary keyword.
fn post_title(task: &EngineTask) -> String {
    let keyword = task.primary_keyword().unwrap_or(task.anchor_text.as_str());
    let templates: [fn(&str) -> String; 4] = [
        |k| format!("The Complete Guide to {}", k),
        |k| format!("{}: What You Need to Know", k),
        |k| format!("Getting Started with {}", k),
        |k| format!("{} Explained: Key Insights and Practical Tips", k),
    ];
    let pick = keyword.chars().count() % templates.len();
    templates[pick](keyword)
}

/// Plain-text summary of the post.
fn description(content: &str) -> String {
    let text = tag_re().replace_all(content, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() > DESCRIPTION_CHARS {
        let truncated: String = text.chars().take(DESCRIPTION_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text
    }
}

fn infer_category(keywords: &[String]) -> &'static str {
    let joined = keywords.join(" ").to_lowercase();
    if TECHNOLOGY_TERMS.iter().any(|t| joined.contains(t)) {
        "Technology"
    } else if BUSINESS_TERMS.iter().any(|t| joined.contains(t)) {
        "Business"
    } else {
        "General"
    }
}

/// Medium reserves the top heading for the title: every heading moves one
/// level down, and the post opens with an italic lede.
fn rewrite_for_medium(content: &str, keyword: &str, format: ContentFormat) -> String {
    let lede = format!(
        "{} is becoming increasingly important in today's digital landscape.",
        keyword
    );
    match format {
        ContentFormat::Html => {
            let demoted = html_heading_re().replace_all(content, |caps: &regex::Captures| {
                let level: u8 = caps[2].parse().unwrap_or(5);
                format!("<{}h{}>", &caps[1], level + 1)
            });
            if demoted.starts_with("<p><em>") {
                demoted.into_owned()
            } else {
                format!("<p><em>{}</em></p>\n{}", lede, demoted)
            }
        }
        ContentFormat::Markdown | ContentFormat::Text => {
            let demoted = markdown_heading_re().replace_all(content, "$1# ");
            if demoted.starts_with('*') {
                demoted.into_owned()
            } else {
                format!("*{}*\n\n{}", lede, demoted)
            }
        }
    }
}

/// dev.to wants backtick code and a front matter block with up to four tags.
fn rewrite_for_devto(content: &str, keyword: &str, keywords: &[String]) -> String {
    let content = content.replace("<code>", "`").replace("</code>", "`");
    if content.contains("---") {
        return content;
    }

    let tags: Vec<String> = keywords
        .iter()
        .map(|k| k.split_whitespace().collect::<String>().to_lowercase())
        .filter(|k| !k.is_empty())
        .take(MAX_DEVTO_TAGS)
        .collect();

    format!(
        "---\ntitle: \"{} Guide\"\ntags: [{}]\n---\n\n{}",
        keyword,
        tags.join(", "),
        content
    )
}

/// Hashnode posts close with a discussion prompt.
fn rewrite_for_hashnode(content: &str, keyword: &str) -> String {
    let mut content = top_heading_re().replace_all(content, "## ").into_owned();
    if !content.contains("What do you think") {
        content.push_str(&format!(
            "\n\n---\n\nWhat do you think about {}? Share your thoughts in the comments below!",
            keyword
        ));
    }
    content
}

/// Telegraph only renders paragraph markup.
fn rewrite_for_telegraph(content: &str) -> String {
    if content.trim_start().starts_with("<p>") {
        return content.to_string();
    }
    format!("<p>{}</p>", content.trim().replace("\n\n", "</p><p>"))
}
