//! Placement opportunities produced by engine discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::PlacementType;

/// A candidate site or page where a link could be placed.
///
/// Opportunities live only for the duration of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementOpportunity {
    pub id: String,
    pub domain: String,
    pub url: String,
    pub placement_type: PlacementType,
    pub domain_authority: f64,
    pub page_authority: f64,
    pub estimated_cost: f64,
    /// 0 (trivial) to 100 (very hard).
    pub difficulty_score: f64,
    /// Engine-specific requirements (formats, minimum length, ...).
    #[serde(default)]
    pub requirements: serde_json::Value,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PlacementOpportunity {
    pub fn new(
        domain: impl Into<String>,
        url: impl Into<String>,
        placement_type: PlacementType,
    ) -> Self {
        let domain = domain.into();
        let discovered_at = Utc::now();
        Self {
            id: format!("{}_{}", domain, discovered_at.timestamp_millis()),
            domain,
            url: url.into(),
            placement_type,
            domain_authority: 0.0,
            page_authority: 0.0,
            estimated_cost: 0.0,
            difficulty_score: 50.0,
            requirements: serde_json::Value::Null,
            discovered_at,
            expires_at: None,
        }
    }

    pub fn with_authority(mut self, domain_authority: f64, page_authority: f64) -> Self {
        self.domain_authority = domain_authority;
        self.page_authority = page_authority;
        self
    }

    pub fn with_cost(mut self, estimated_cost: f64) -> Self {
        self.estimated_cost = estimated_cost;
        self
    }

    pub fn with_difficulty(mut self, difficulty_score: f64) -> Self {
        self.difficulty_score = difficulty_score.clamp(0.0, 100.0);
        self
    }

    pub fn with_requirements(mut self, requirements: serde_json::Value) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn discovered_at(mut self, at: DateTime<Utc>) -> Self {
        self.discovered_at = at;
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
