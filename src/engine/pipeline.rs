//! The shared engine pipeline.
//!
//! `EngineRuntime` wraps one [`Engine`] with everything the pipeline needs
//! around it: the engine's settings, its rate limiter, the quality assessor
//! and the verification scheduler. Every outcome, including collaborator
//! failures, comes back as a [`LinkPlacementResult`]; `execute` never errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use super::anchor::{apply_anchor, relocate_anchor};
use super::scoring::rank_opportunities;
use super::{Engine, QualityAssessor, VerificationRequest, VerificationScheduler};
use crate::config::{EngineSettings, SchedulerConfig};
use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::model::{
    EngineTask, EngineType, ErrorCode, GeneratedContent, LinkPlacementResult, OpportunityFailure,
    PipelineMetrics, Placement, PlacementOpportunity, PlacementStatus, ResultError,
    SubmissionResult,
};
use crate::rate_limit::{CounterStore, RateLimiter};

/// Minimum anchor text length in characters.
const MIN_ANCHOR_CHARS: usize = 3;
/// Characters of content kept in the placement snippet.
const SNIPPET_CHARS: usize = 200;
/// Approval delay assumed when the platform gives no estimate.
const DEFAULT_APPROVAL_HOURS: f64 = 1.0;

/// Outcome of task validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Validation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Where a single opportunity attempt ended.
enum AttemptOutcome {
    Placed {
        submission: SubmissionResult,
        content: GeneratedContent,
        quality: f64,
    },
    Failed(OpportunityFailure),
}

/// An engine together with the services its pipeline runs against.
pub struct EngineRuntime {
    engine: Arc<dyn Engine>,
    settings: EngineSettings,
    rate_limiter: RateLimiter,
    quality: Arc<dyn QualityAssessor>,
    verifier: Arc<dyn VerificationScheduler>,
    quality_threshold: f64,
    metrics: MetricsCollector,
}

impl EngineRuntime {
    /// Creates a runtime whose rate limiter keeps its counters in `counters`.
    pub fn new(
        engine: Arc<dyn Engine>,
        settings: EngineSettings,
        counters: Arc<dyn CounterStore>,
        key_prefix: &str,
        quality: Arc<dyn QualityAssessor>,
        verifier: Arc<dyn VerificationScheduler>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            counters,
            key_prefix,
            engine.engine_type(),
            engine.rate_limit_policy(&settings),
        );

        Self {
            engine,
            settings,
            rate_limiter,
            quality,
            verifier,
            quality_threshold: 0.7,
            metrics: MetricsCollector::new(),
        }
    }

    /// Creates a runtime with the engine's settings and the quality threshold
    /// taken from `config`.
    pub fn configured(
        engine: Arc<dyn Engine>,
        config: &SchedulerConfig,
        counters: Arc<dyn CounterStore>,
        quality: Arc<dyn QualityAssessor>,
        verifier: Arc<dyn VerificationScheduler>,
    ) -> Self {
        let settings = config.engine_settings(&engine.engine_type());
        Self::new(engine, settings, counters, &config.key_prefix, quality, verifier)
            .with_quality_threshold(config.quality_threshold)
    }

    /// Sets the minimum quality score for content to be submitted.
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn engine_type(&self) -> EngineType {
        self.engine.engine_type()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Checks the task before any collaborator is called.
    pub async fn validate(&self, task: &EngineTask) -> Validation {
        let mut errors = Vec::new();

        let target_host = match url::Url::parse(&task.target_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                url.host_str().map(|h| h.to_ascii_lowercase())
            }
            _ => None,
        };
        if target_host.is_none() {
            errors.push(format!("Invalid target URL: '{}'", task.target_url));
        }

        if task.anchor_text.trim().chars().count() < MIN_ANCHOR_CHARS {
            errors.push(format!(
                "Anchor text must be at least {} characters",
                MIN_ANCHOR_CHARS
            ));
        }

        if task.primary_keyword().is_none() {
            errors.push("At least one keyword is required".to_string());
        }

        errors.extend(self.engine.validate(task));

        if let Some(host) = target_host {
            match self.rate_limiter.check_limit(&host).await {
                Ok(decision) if !decision.allowed => {
                    self.metrics.record_rate_limited(self.engine_type().as_str());
                    errors.push(format!(
                        "Rate limit reached for {} ({}/{} this hour)",
                        host, decision.count, decision.limit
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Rate limit check failed, admitting task");
                }
            }
        }

        Validation::from_errors(errors)
    }

    /// Discovers opportunities, drops unusable ones and ranks the rest.
    pub async fn discover_opportunities(
        &self,
        task: &EngineTask,
    ) -> Result<Vec<(PlacementOpportunity, f64)>, EngineError> {
        let now = Utc::now();
        let discovered = self.engine.discover(task).await?;
        let total = discovered.len();

        let mut usable = Vec::with_capacity(total);
        let mut multipliers = HashMap::new();

        for opportunity in discovered {
            if opportunity.is_expired(now)
                || task.requirements.is_blocked(&opportunity.domain)
                || !task.requirements.allows(opportunity.placement_type)
                || task
                    .requirements
                    .min_domain_authority
                    .is_some_and(|min| opportunity.domain_authority < min)
            {
                debug!(task_id = %task.id, domain = %opportunity.domain, "Opportunity filtered out");
                continue;
            }

            match self.rate_limiter.check_limit_at(&opportunity.domain, now).await {
                Ok(decision) if !decision.allowed => {
                    self.metrics.record_rate_limited(self.engine_type().as_str());
                    debug!(task_id = %task.id, domain = %opportunity.domain, "Opportunity rate limited");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(domain = %opportunity.domain, error = %e, "Rate limit check failed");
                }
            }

            if !multipliers.contains_key(&opportunity.domain) {
                let multiplier = self
                    .rate_limiter
                    .cost_multiplier(&opportunity.domain)
                    .await
                    .unwrap_or(1.0);
                multipliers.insert(opportunity.domain.clone(), multiplier);
            }
            usable.push(opportunity);
        }

        let ranked = rank_opportunities(
            usable,
            task.requirements.max_cost_per_link,
            &multipliers,
            now,
        );
        debug!(
            task_id = %task.id,
            discovered = total,
            usable = ranked.len(),
            "Ranked opportunities"
        );
        Ok(ranked)
    }

    /// Runs the full pipeline for one task.
    pub async fn execute(&self, task: &EngineTask) -> LinkPlacementResult {
        let started = Instant::now();
        let mut metrics = PipelineMetrics::default();

        let validation = self.validate(task).await;
        if !validation.valid {
            info!(task_id = %task.id, errors = ?validation.errors, "Task failed validation");
            return finish_failure(
                ResultError::new(ErrorCode::ValidationFailed, validation.errors.join(", "), false),
                metrics,
                started,
            );
        }

        add_resource(&mut metrics, "opportunity_discovery");
        let opportunities = match self.discover_opportunities(task).await {
            Ok(opportunities) => opportunities,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Opportunity discovery failed");
                return finish_failure(
                    ResultError::new(ErrorCode::EngineError, e.to_string(), true),
                    metrics,
                    started,
                );
            }
        };

        if opportunities.is_empty() {
            info!(task_id = %task.id, "No usable opportunities");
            return finish_failure(
                ResultError::new(
                    ErrorCode::NoOpportunities,
                    "No suitable placement opportunities available",
                    true,
                )
                .with_retry_after(self.cooldown_end()),
                metrics,
                started,
            );
        }

        let total = opportunities.len();
        for (opportunity, score) in opportunities {
            metrics.attempts_count += 1;
            debug!(
                task_id = %task.id,
                domain = %opportunity.domain,
                score = score,
                attempt = metrics.attempts_count,
                total = total,
                "Attempting opportunity"
            );

            let failure = match self.attempt(task, &opportunity, &mut metrics).await {
                Ok(AttemptOutcome::Placed {
                    submission,
                    content,
                    quality,
                }) => {
                    let mut result = LinkPlacementResult::success(
                        self.build_placement(task, &opportunity, score, &submission, &content, quality, &metrics),
                        metrics,
                    );
                    self.post_process(&mut result, task, &submission).await;
                    set_elapsed(&mut result, started);
                    info!(
                        task_id = %task.id,
                        domain = %opportunity.domain,
                        attempts = result.metrics().attempts_count,
                        "Placement succeeded"
                    );
                    return result;
                }
                Ok(AttemptOutcome::Failed(failure)) => failure,
                Err(e) => OpportunityFailure {
                    domain: opportunity.domain.clone(),
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                },
            };

            warn!(
                task_id = %task.id,
                domain = %failure.domain,
                reason = %failure.reason,
                retryable = failure.retryable,
                "Opportunity failed"
            );
            metrics.diagnostics.push(failure);
        }

        let retryable = metrics.diagnostics.iter().any(|d| d.retryable);
        let details = metrics
            .diagnostics
            .iter()
            .map(|d| format!("{}: {}", d.domain, d.reason))
            .collect::<Vec<_>>()
            .join("; ");
        let mut error = ResultError::new(
            self.engine.exhausted_code(),
            format!("Exhausted all {} opportunities. Errors: {}", total, details),
            retryable,
        );
        if retryable {
            error = error.with_retry_after(self.cooldown_end());
        }
        finish_failure(error, metrics, started)
    }

    /// Generate, gate and submit for a single opportunity.
    async fn attempt(
        &self,
        task: &EngineTask,
        opportunity: &PlacementOpportunity,
        metrics: &mut PipelineMetrics,
    ) -> Result<AttemptOutcome, EngineError> {
        add_resource(metrics, "content_generation");
        let mut content = self.engine.generate(opportunity, task).await?;
        let (_, link) = apply_anchor(&mut content, &task.anchor_text, &task.target_url, &task.keywords);
        let mut content = self.engine.rewrite(content, opportunity, task)?;
        relocate_anchor(&mut content, &link);

        let assessment = self.quality.assess(&content, task).await?;
        let passed = assessment.passes(self.quality_threshold);
        self.metrics.record_quality(assessment.score, passed);
        if !passed {
            return Ok(AttemptOutcome::Failed(OpportunityFailure {
                domain: opportunity.domain.clone(),
                reason: format!(
                    "low quality content ({:.2} < {:.2})",
                    assessment.score, self.quality_threshold
                ),
                retryable: false,
            }));
        }
        content.metadata.quality_score = assessment.score;

        match self.rate_limiter.reserve(&opportunity.domain).await {
            Ok(decision) if !decision.allowed => {
                self.metrics.record_rate_limited(self.engine_type().as_str());
                return Ok(AttemptOutcome::Failed(OpportunityFailure {
                    domain: opportunity.domain.clone(),
                    reason: format!(
                        "rate limit reached ({}/{} this hour)",
                        decision.count, decision.limit
                    ),
                    retryable: true,
                }));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(domain = %opportunity.domain, error = %e, "Slot reservation failed, submitting anyway");
            }
        }

        add_resource(metrics, &format!("{}_submission", opportunity.domain));
        let submission = match self.engine.submit(&content, opportunity, task).await {
            Ok(submission) => submission,
            Err(e) => {
                self.record_failure(&opportunity.domain).await;
                return Err(e);
            }
        };

        if submission.success {
            return Ok(AttemptOutcome::Placed {
                submission,
                content,
                quality: assessment.score,
            });
        }

        self.record_failure(&opportunity.domain).await;
        let (reason, retryable) = match &submission.error {
            Some(error) => (format!("{} ({})", error.message, error.code), error.retryable),
            None => ("Unknown submission error".to_string(), true),
        };
        Ok(AttemptOutcome::Failed(OpportunityFailure {
            domain: opportunity.domain.clone(),
            reason,
            retryable,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_placement(
        &self,
        task: &EngineTask,
        opportunity: &PlacementOpportunity,
        score: f64,
        submission: &SubmissionResult,
        content: &GeneratedContent,
        quality: f64,
        metrics: &PipelineMetrics,
    ) -> Placement {
        let failed: Vec<String> = metrics
            .diagnostics
            .iter()
            .map(|d| format!("{} ({})", d.domain, d.reason))
            .collect();

        Placement {
            source_url: submission
                .placement_url
                .clone()
                .unwrap_or_else(|| opportunity.url.clone()),
            source_domain: opportunity.domain.clone(),
            target_url: task.target_url.clone(),
            anchor_text: task.anchor_text.clone(),
            placement_type: opportunity.placement_type,
            status: if submission.requires_moderation {
                PlacementStatus::Pending
            } else {
                PlacementStatus::Live
            },
            domain_authority: opportunity.domain_authority,
            page_authority: opportunity.page_authority,
            quality_score: quality * 100.0,
            cost: opportunity.estimated_cost,
            placement_date: Utc::now(),
            verification_scheduled: None,
            engine_data: json!({
                "engine": self.engine_type(),
                "submissionId": submission.submission_id,
                "opportunityScore": score,
                "failedOpportunities": failed,
                "totalAttempts": metrics.attempts_count,
            }),
            content_snippet: content.snippet(SNIPPET_CHARS),
        }
    }

    /// Schedules verification and reports the success to the rate limiter.
    async fn post_process(
        &self,
        result: &mut LinkPlacementResult,
        task: &EngineTask,
        submission: &SubmissionResult,
    ) {
        let Some(placement) = result.placement_mut() else {
            return;
        };

        let approval_hours = submission
            .estimated_approval_hours
            .unwrap_or(DEFAULT_APPROVAL_HOURS)
            .max(0.0);
        let verification_date =
            Utc::now() + chrono::Duration::milliseconds((approval_hours * 3_600_000.0) as i64);
        placement.verification_scheduled = Some(verification_date);

        let request = VerificationRequest {
            placement_id: submission
                .submission_id
                .clone()
                .unwrap_or_else(|| format!("{}:{}", task.id, placement.source_domain)),
            verification_date,
            verification_level: task.priority.verification_level(),
            placement_url: placement.source_url.clone(),
            target_url: placement.target_url.clone(),
        };
        if let Err(e) = self.verifier.schedule(request).await {
            warn!(task_id = %task.id, error = %e, "Failed to schedule verification");
        }

        if let Err(e) = self.rate_limiter.record_success(&placement.source_domain).await {
            warn!(domain = %placement.source_domain, error = %e, "Failed to record success");
        }
    }

    async fn record_failure(&self, domain: &str) {
        if let Err(e) = self.rate_limiter.record_failure(domain).await {
            warn!(domain = domain, error = %e, "Failed to record submission failure");
        }
    }

    fn cooldown_end(&self) -> DateTime<Utc> {
        Utc::now()
            + chrono::Duration::from_std(self.settings.cooldown())
                .unwrap_or_else(|_| chrono::Duration::hours(1))
    }
}

fn add_resource(metrics: &mut PipelineMetrics, resource: &str) {
    if !metrics.resources_used.iter().any(|r| r == resource) {
        metrics.resources_used.push(resource.to_string());
    }
}

fn finish_failure(
    error: ResultError,
    mut metrics: PipelineMetrics,
    started: Instant,
) -> LinkPlacementResult {
    metrics.processing_time_ms = started.elapsed().as_millis() as u64;
    LinkPlacementResult::failure(error, metrics)
}

fn set_elapsed(result: &mut LinkPlacementResult, started: Instant) {
    let elapsed = started.elapsed().as_millis() as u64;
    result.set_processing_time(elapsed);
}
