//! Opportunity ranking.
//!
//! ```text
//! score = 0.4 * domainAuthority
//!       + 0.3 * (100 - difficulty)
//!       + 0.2 * costEfficiency      max(0, (maxCost - cost) / maxCost) * 100
//!       + 0.1 * freshness           max(0, 100 - hours since discovery)
//! ```
//!
//! `cost` is the estimated cost times the domain's failure penalty multiplier.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::PlacementOpportunity;

const AUTHORITY_WEIGHT: f64 = 0.4;
const EASE_WEIGHT: f64 = 0.3;
const COST_WEIGHT: f64 = 0.2;
const FRESHNESS_WEIGHT: f64 = 0.1;

/// Weighted score of one opportunity.
pub fn opportunity_score(
    opportunity: &PlacementOpportunity,
    max_cost: f64,
    cost_multiplier: f64,
    now: DateTime<Utc>,
) -> f64 {
    let effective_cost = opportunity.estimated_cost * cost_multiplier;
    let cost_efficiency = if max_cost > 0.0 {
        ((max_cost - effective_cost) / max_cost).max(0.0) * 100.0
    } else {
        0.0
    };

    let hours = (now - opportunity.discovered_at).num_milliseconds() as f64 / 3_600_000.0;
    let freshness = (100.0 - hours.max(0.0)).max(0.0);

    AUTHORITY_WEIGHT * opportunity.domain_authority
        + EASE_WEIGHT * (100.0 - opportunity.difficulty_score)
        + COST_WEIGHT * cost_efficiency
        + FRESHNESS_WEIGHT * freshness
}

/// Scores and sorts opportunities, best first.
///
/// The sort is stable: equal scores keep discovery order. Domains missing
/// from `multipliers` carry no penalty.
pub fn rank_opportunities(
    opportunities: Vec<PlacementOpportunity>,
    max_cost: f64,
    multipliers: &HashMap<String, f64>,
    now: DateTime<Utc>,
) -> Vec<(PlacementOpportunity, f64)> {
    let mut scored: Vec<(PlacementOpportunity, f64)> = opportunities
        .into_iter()
        .map(|opportunity| {
            let multiplier = multipliers
                .get(&opportunity.domain)
                .copied()
                .unwrap_or(1.0);
            let score = opportunity_score(&opportunity, max_cost, multiplier, now);
            (opportunity, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}
