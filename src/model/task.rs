//! Task definitions for the placement scheduler.
//!
//! - `EngineTask`: one requested link placement, as stored in the queue
//! - `Priority` / `EngineType`: the two halves of a queue partition key
//! - `TaskRequirements`: the caller's constraints on where and how to place

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::VerificationLevel;

/// Default maximum cost per link when the caller does not specify one.
const DEFAULT_MAX_COST_PER_LINK: f64 = 50.0;

/// Task priority. Workers poll partitions in the order of [`Priority::ALL`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// Verification depth used once a placement of this priority succeeds.
    pub fn verification_level(&self) -> VerificationLevel {
        match self {
            Priority::Low => VerificationLevel::Basic,
            Priority::Normal => VerificationLevel::Standard,
            Priority::High | Priority::Urgent => VerificationLevel::Premium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" => Ok(Priority::Urgent),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!(
                "unknown priority '{}': expected urgent, high, normal or low",
                other
            )),
        }
    }
}

/// Identifier of a placement engine (e.g. `web2_platforms`, `blog_comments`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineType(String);

impl EngineType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A queue subdivision keyed by engine type and priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKey {
    pub engine_type: EngineType,
    pub priority: Priority,
}

impl PartitionKey {
    pub fn new(engine_type: EngineType, priority: Priority) -> Self {
        Self {
            engine_type,
            priority,
        }
    }

    /// Partitions of one engine type, in polling order.
    pub fn all_for(engine_type: &EngineType) -> Vec<PartitionKey> {
        Priority::ALL
            .iter()
            .map(|p| PartitionKey::new(engine_type.clone(), *p))
            .collect()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.engine_type, self.priority)
    }
}

/// Desired content length of generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl ContentLength {
    /// Approximate word count requested from the content generator.
    pub fn word_target(&self) -> usize {
        match self {
            ContentLength::Short => 200,
            ContentLength::Medium => 400,
            ContentLength::Long => 800,
        }
    }
}

/// Tone requested from the content generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTone {
    #[default]
    Professional,
    Casual,
    Technical,
    Friendly,
}

/// Kind of placement an opportunity offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementType {
    BlogComment,
    Web2Post,
    GuestPost,
    ForumPost,
    ResourcePage,
    Directory,
    SocialProfile,
}

impl fmt::Display for PlacementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlacementType::BlogComment => "blog_comment",
            PlacementType::Web2Post => "web2_post",
            PlacementType::GuestPost => "guest_post",
            PlacementType::ForumPost => "forum_post",
            PlacementType::ResourcePage => "resource_page",
            PlacementType::Directory => "directory",
            PlacementType::SocialProfile => "social_profile",
        };
        write!(f, "{}", name)
    }
}

/// Caller constraints on a placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskRequirements {
    /// Minimum domain authority of the placing site.
    pub min_domain_authority: Option<f64>,
    /// Maximum cost the campaign accepts for one link.
    pub max_cost_per_link: f64,
    pub content_length: ContentLength,
    pub content_tone: ContentTone,
    /// Allowed placement types; empty means any.
    pub placement_types: Vec<PlacementType>,
    pub language: String,
    /// Domains that must never host the link.
    pub domain_blocklist: Vec<String>,
}

impl Default for TaskRequirements {
    fn default() -> Self {
        Self {
            min_domain_authority: None,
            max_cost_per_link: DEFAULT_MAX_COST_PER_LINK,
            content_length: ContentLength::default(),
            content_tone: ContentTone::default(),
            placement_types: Vec::new(),
            language: "en".to_string(),
            domain_blocklist: Vec::new(),
        }
    }
}

impl TaskRequirements {
    /// Returns whether `domain` (or one of its parents) is blocklisted.
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        self.domain_blocklist.iter().any(|blocked| {
            let blocked = blocked.trim().to_ascii_lowercase();
            !blocked.is_empty()
                && (domain == blocked || domain.ends_with(&format!(".{}", blocked)))
        })
    }

    /// Returns whether an opportunity of this type may be used.
    pub fn allows(&self, placement_type: PlacementType) -> bool {
        self.placement_types.is_empty() || self.placement_types.contains(&placement_type)
    }
}

/// A requested link placement.
///
/// Tasks are serialized into the queue store and executed by workers. A task
/// is immutable once enqueued except for `attempts` (and the retry
/// `scheduled_for`) which change when it is re-enqueued after a retryable
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineTask {
    pub id: Uuid,
    pub campaign_id: String,
    pub user_id: String,
    pub engine_type: EngineType,
    #[serde(default)]
    pub priority: Priority,
    pub target_url: String,
    pub anchor_text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub niche: Vec<String>,
    #[serde(default)]
    pub requirements: TaskRequirements,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Number of times this task has been re-enqueued after a failure.
    #[serde(default)]
    pub attempts: u32,
}

impl EngineTask {
    /// Creates a new normal-priority task.
    pub fn new(
        campaign_id: impl Into<String>,
        user_id: impl Into<String>,
        engine_type: impl Into<EngineType>,
        target_url: impl Into<String>,
        anchor_text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id: campaign_id.into(),
            user_id: user_id.into(),
            engine_type: engine_type.into(),
            priority: Priority::Normal,
            target_url: target_url.into(),
            anchor_text: anchor_text.into(),
            keywords: Vec::new(),
            niche: Vec::new(),
            requirements: TaskRequirements::default(),
            created_at: Utc::now(),
            scheduled_for: None,
            attempts: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_niche<I, S>(mut self, niche: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.niche = niche.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_requirements(mut self, requirements: TaskRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// The partition this task is queued in.
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.engine_type.clone(), self.priority)
    }

    /// Lowercased host of the target URL, if it parses.
    pub fn target_domain(&self) -> Option<String> {
        url::Url::parse(&self.target_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }

    /// The primary keyword, used as the content topic.
    pub fn primary_keyword(&self) -> Option<&str> {
        self.keywords
            .iter()
            .map(|k| k.trim())
            .find(|k| !k.is_empty())
    }

    /// Returns whether the task may run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.map_or(true, |at| at <= now)
    }

    /// Copy of this task for the next retry.
    pub fn retried(&self, scheduled_for: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.attempts += 1;
        next.scheduled_for = Some(scheduled_for);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_task() -> EngineTask {
        EngineTask::new(
            "campaign-1",
            "user-1",
            "web2_platforms",
            "https://www.example.com/landing",
            "example anchor",
        )
        .with_keywords(["rust scheduling", "task queues"])
    }

    #[test]
    fn test_priority_polling_order() {
        assert_eq!(
            Priority::ALL,
            [
                Priority::Urgent,
                Priority::High,
                Priority::Normal,
                Priority::Low
            ]
        );
        assert!(Priority::Urgent < Priority::Low);
    }

    #[test]
    fn test_priority_verification_levels() {
        assert_eq!(Priority::Low.verification_level(), VerificationLevel::Basic);
        assert_eq!(
            Priority::Normal.verification_level(),
            VerificationLevel::Standard
        );
        assert_eq!(
            Priority::High.verification_level(),
            VerificationLevel::Premium
        );
        assert_eq!(
            Priority::Urgent.verification_level(),
            VerificationLevel::Premium
        );
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("URGENT".parse::<Priority>(), Ok(Priority::Urgent));
        assert_eq!(" low ".parse::<Priority>(), Ok(Priority::Low));
        assert!("asap".parse::<Priority>().is_err());
    }

    #[test]
    fn test_partition_key_display() {
        let task = create_test_task().with_priority(Priority::High);
        assert_eq!(task.partition().to_string(), "web2_platforms:high");

        let partitions = PartitionKey::all_for(&EngineType::new("blog_comments"));
        assert_eq!(partitions.len(), 4);
        assert_eq!(partitions[0].priority, Priority::Urgent);
        assert_eq!(partitions[3].priority, Priority::Low);
    }

    #[test]
    fn test_target_domain() {
        let task = create_test_task();
        assert_eq!(task.target_domain(), Some("www.example.com".to_string()));

        let mut bad = create_test_task();
        bad.target_url = "not a url".to_string();
        assert_eq!(bad.target_domain(), None);
    }

    #[test]
    fn test_blocklist_matches_subdomains() {
        let requirements = TaskRequirements {
            domain_blocklist: vec!["spam.net".to_string()],
            ..Default::default()
        };

        assert!(requirements.is_blocked("spam.net"));
        assert!(requirements.is_blocked("blog.SPAM.net"));
        assert!(!requirements.is_blocked("notspam.net"));
    }

    #[test]
    fn test_retried_increments_attempts() {
        let task = create_test_task();
        let at = Utc::now() + chrono::Duration::minutes(5);
        let retried = task.retried(at);

        assert_eq!(retried.id, task.id);
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.scheduled_for, Some(at));
        assert!(!retried.is_due(Utc::now()));
        assert_eq!(retried.retried(at).attempts, 2);
    }

    #[test]
    fn test_task_deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "campaignId": "c-1",
            "userId": "u-1",
            "engineType": "blog_comments",
            "targetUrl": "https://example.com",
            "anchorText": "example",
            "createdAt": Utc::now(),
        });

        let task: EngineTask = serde_json::from_value(json).expect("task should deserialize");
        assert_eq!(task.priority, Priority::Normal);
        assert_eq!(task.attempts, 0);
        assert!(task.keywords.is_empty());
        assert_eq!(task.requirements.language, "en");
        assert!(task.is_due(Utc::now()));
    }
}
