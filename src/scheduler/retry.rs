//! Worker-level retry decisions.

use chrono::{DateTime, Utc};

use crate::config::EngineSettings;
use crate::model::{EngineTask, LinkPlacementResult};

/// What happens to a task after a failed run.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Re-enqueue this copy of the task.
    Retry(EngineTask),
    /// Report the failure; the task is done.
    Terminal,
}

/// Decides whether a failed `task` goes back into its partition.
///
/// A retry bumps `attempts` and schedules the task at
/// `max(now + delay, retry_after)`. Once `attempts` reached the engine's
/// `retry_attempts` every failure is terminal.
pub fn plan_retry(
    task: &EngineTask,
    result: &LinkPlacementResult,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> RetryDecision {
    if result.is_success() || !result.is_retryable() || task.attempts >= settings.retry_attempts {
        return RetryDecision::Terminal;
    }

    let delay = settings
        .retry_policy
        .delay(settings.retry_delay(), task.attempts);
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365));

    let mut scheduled_for = now + delay;
    if let Some(retry_after) = result.retry_after() {
        scheduled_for = scheduled_for.max(retry_after);
    }

    RetryDecision::Retry(task.retried(scheduled_for))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::model::{ErrorCode, PipelineMetrics, ResultError};
    use std::time::Duration;

    fn failure(retryable: bool) -> LinkPlacementResult {
        LinkPlacementResult::failure(
            ResultError::new(ErrorCode::SubmissionFailed, "boom", retryable),
            PipelineMetrics::default(),
        )
    }

    fn create_test_task() -> EngineTask {
        EngineTask::new("c", "u", "blog_comments", "https://t.io", "anchor")
    }

    #[test]
    fn test_retry_schedules_after_delay() {
        let settings = EngineSettings::default().with_retry_delay(Duration::from_secs(60));
        let now = Utc::now();

        match plan_retry(&create_test_task(), &failure(true), &settings, now) {
            RetryDecision::Retry(next) => {
                assert_eq!(next.attempts, 1);
                assert_eq!(next.scheduled_for, Some(now + chrono::Duration::seconds(60)));
            }
            RetryDecision::Terminal => panic!("expected a retry"),
        }
    }

    #[test]
    fn test_retry_after_wins_when_later() {
        let settings = EngineSettings::default().with_retry_delay(Duration::from_secs(60));
        let now = Utc::now();
        let cooldown_end = now + chrono::Duration::hours(1);
        let result = LinkPlacementResult::failure(
            ResultError::new(ErrorCode::NoOpportunities, "none", true).with_retry_after(cooldown_end),
            PipelineMetrics::default(),
        );

        match plan_retry(&create_test_task(), &result, &settings, now) {
            RetryDecision::Retry(next) => assert_eq!(next.scheduled_for, Some(cooldown_end)),
            RetryDecision::Terminal => panic!("expected a retry"),
        }
    }

    #[test]
    fn test_non_retryable_is_terminal() {
        let settings = EngineSettings::default();
        assert_eq!(
            plan_retry(&create_test_task(), &failure(false), &settings, Utc::now()),
            RetryDecision::Terminal
        );
    }

    #[test]
    fn test_retries_stop_at_ceiling() {
        let settings = EngineSettings::default().with_retry_attempts(3);
        let mut task = create_test_task();
        let mut retries = 0;

        while let RetryDecision::Retry(next) = plan_retry(&task, &failure(true), &settings, Utc::now()) {
            assert_eq!(next.attempts, task.attempts + 1);
            task = next;
            retries += 1;
        }

        assert_eq!(retries, 3);
        assert_eq!(task.attempts, 3);
    }

    #[test]
    fn test_exponential_policy_grows_with_attempts() {
        let settings = EngineSettings::default()
            .with_retry_delay(Duration::from_secs(10))
            .with_retry_policy(RetryPolicy::Exponential { max_delay_secs: 60 });
        let now = Utc::now();
        let mut task = create_test_task();
        task.attempts = 2;

        match plan_retry(&task, &failure(true), &settings, now) {
            RetryDecision::Retry(next) => {
                assert_eq!(next.scheduled_for, Some(now + chrono::Duration::seconds(40)));
            }
            RetryDecision::Terminal => panic!("expected a retry"),
        }

        let settings = settings.with_retry_attempts(5);
        task.attempts = 3;
        match plan_retry(&task, &failure(true), &settings, now) {
            RetryDecision::Retry(next) => {
                assert_eq!(next.scheduled_for, Some(now + chrono::Duration::seconds(60)));
            }
            RetryDecision::Terminal => panic!("expected a retry"),
        }
    }
}
