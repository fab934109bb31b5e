//! End-to-end scheduler scenarios against the in-memory queue store.
//!
//! Engines are assembled from scripted collaborator services, so every
//! scenario runs the real pipeline, workers and queue manager.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use placement_scheduler::config::{EngineSettings, SchedulerConfig};
use placement_scheduler::engine::{
    ContentGenerator, DiscoveryQuery, DiscoveryService, EngineRuntime, MetadataQualityAssessor,
    ServiceEngine, SubmissionService, VerificationRequest, VerificationScheduler,
};
use placement_scheduler::error::EngineError;
use placement_scheduler::model::{
    ContentFormat, ContentRequest, EngineTask, ErrorCode, GeneratedContent, PlacementOpportunity,
    PlacementType, Priority, SubmissionResult,
};
use placement_scheduler::scheduler::{QueueManager, SchedulerEvent};
use placement_scheduler::store::{MemoryQueueStore, PartitionKey, QueueStore};
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

const ENGINE: &str = "blog_comments";

struct ScriptedDiscovery {
    opportunities: Vec<PlacementOpportunity>,
    /// Discovery waits for a permit when set.
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl DiscoveryService for ScriptedDiscovery {
    async fn discover(
        &self,
        _query: &DiscoveryQuery,
    ) -> Result<Vec<PlacementOpportunity>, EngineError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| EngineError::Discovery(e.to_string()))?;
        }
        Ok(self.opportunities.clone())
    }
}

/// Hands out quality scores in order, then 0.9 for every later call.
#[derive(Default)]
struct ScriptedGenerator {
    scores: Mutex<VecDeque<f64>>,
}

impl ScriptedGenerator {
    fn with_scores(scores: impl IntoIterator<Item = f64>) -> Self {
        Self {
            scores: Mutex::new(scores.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, EngineError> {
        let score = self
            .scores
            .lock()
            .expect("scores lock")
            .pop_front()
            .unwrap_or(0.9);
        let mut content = GeneratedContent::new(
            format!(
                "Great write-up on {}. We covered the same ground last week and found it useful.",
                request.keywords.join(", ")
            ),
            ContentFormat::Html,
        );
        content.metadata.quality_score = score;
        Ok(content)
    }
}

/// Fails submissions for the listed domains with an HTTP status.
#[derive(Default)]
struct ScriptedSubmitter {
    failures: HashMap<String, u16>,
}

#[async_trait]
impl SubmissionService for ScriptedSubmitter {
    async fn submit(
        &self,
        _content: &GeneratedContent,
        opportunity: &PlacementOpportunity,
    ) -> Result<SubmissionResult, EngineError> {
        match self.failures.get(&opportunity.domain) {
            Some(status) => Err(EngineError::submission(*status, "platform rejected the post")),
            None => Ok(SubmissionResult::published(
                format!("https://{}/comments/1", opportunity.domain),
                Uuid::new_v4().to_string(),
            )),
        }
    }
}

#[derive(Default)]
struct RecordingVerifier {
    requests: Mutex<Vec<VerificationRequest>>,
}

#[async_trait]
impl VerificationScheduler for RecordingVerifier {
    async fn schedule(&self, request: VerificationRequest) -> Result<(), EngineError> {
        self.requests.lock().expect("requests lock").push(request);
        Ok(())
    }
}

fn opportunity(domain: &str, da: f64) -> PlacementOpportunity {
    PlacementOpportunity::new(domain, format!("https://{}/post", domain), PlacementType::BlogComment)
        .with_authority(da, da - 5.0)
        .with_difficulty(40.0)
        .with_cost(5.0)
}

fn create_test_task(priority: Priority) -> EngineTask {
    EngineTask::new(
        "campaign-1",
        "user-1",
        ENGINE,
        "https://shop.example.com/widgets",
        "quality widgets",
    )
    .with_keywords(["widgets", "hardware"])
    .with_priority(priority)
}

fn test_config(settings: EngineSettings) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_idle_poll_interval(Duration::from_millis(10))
        .with_error_backoff(Duration::from_millis(10))
        .with_shutdown_timeout(Duration::from_secs(10))
        .with_engine(ENGINE, settings)
}

struct Harness {
    manager: Arc<QueueManager>,
    store: Arc<MemoryQueueStore>,
    verifier: Arc<RecordingVerifier>,
}

fn create_harness(
    config: SchedulerConfig,
    discovery: ScriptedDiscovery,
    generator: ScriptedGenerator,
    submitter: ScriptedSubmitter,
) -> Harness {
    let store = Arc::new(MemoryQueueStore::new());
    let verifier = Arc::new(RecordingVerifier::default());
    let engine = ServiceEngine::new(
        ENGINE,
        Arc::new(discovery),
        Arc::new(generator),
        Arc::new(submitter),
    );
    let runtime = EngineRuntime::configured(
        Arc::new(engine),
        &config,
        store.clone(),
        Arc::new(MetadataQualityAssessor),
        verifier.clone(),
    );
    let manager = Arc::new(QueueManager::new(config, store.clone(), [runtime]));

    Harness {
        manager,
        store,
        verifier,
    }
}

/// Waits for the next event accepted by `select`.
async fn next_event<T>(
    rx: &mut broadcast::Receiver<SchedulerEvent>,
    mut select: impl FnMut(SchedulerEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(found) = select(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_quality_gate_falls_through_to_next_opportunity() {
    let harness = create_harness(
        test_config(EngineSettings::default()),
        ScriptedDiscovery {
            opportunities: vec![
                opportunity("ninety.example", 90.0),
                opportunity("seventy.example", 70.0),
                opportunity("fifty.example", 50.0),
            ],
            gate: None,
        },
        ScriptedGenerator::with_scores([0.5, 0.8]),
        ScriptedSubmitter::default(),
    );
    let task = create_test_task(Priority::Normal);
    let mut rx = harness.manager.subscribe();
    harness.manager.add_task(task.clone()).await.expect("add task");
    harness.manager.start().await.expect("start");

    let (task_id, placement_url) = next_event(&mut rx, |event| match event {
        SchedulerEvent::TaskCompleted {
            task_id,
            placement_url,
            ..
        } => Some((task_id, placement_url)),
        _ => None,
    })
    .await;
    harness.manager.stop().await.expect("stop");

    assert_eq!(task_id, task.id);
    assert_eq!(placement_url, "https://seventy.example/comments/1");

    let requests = harness.verifier.requests.lock().expect("requests lock");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target_url, task.target_url);

    let partition = task.partition();
    let counters = harness.store.counters(&partition).await.expect("counters");
    assert_eq!(counters.completed, 1);
    assert_eq!(counters.failed, 0);
    assert_eq!(harness.store.len(&partition).await.expect("len"), 0);
    assert_eq!(harness.store.leased(&partition).await.expect("leased"), 0);
}

#[tokio::test]
async fn test_pipeline_result_reports_attempts_and_quality() {
    let store = Arc::new(MemoryQueueStore::new());
    let engine = ServiceEngine::new(
        ENGINE,
        Arc::new(ScriptedDiscovery {
            opportunities: vec![
                opportunity("ninety.example", 90.0),
                opportunity("seventy.example", 70.0),
                opportunity("fifty.example", 50.0),
            ],
            gate: None,
        }),
        Arc::new(ScriptedGenerator::with_scores([0.5, 0.8])),
        Arc::new(ScriptedSubmitter::default()),
    );
    let runtime = EngineRuntime::configured(
        Arc::new(engine),
        &test_config(EngineSettings::default()),
        store,
        Arc::new(MetadataQualityAssessor),
        Arc::new(RecordingVerifier::default()),
    );

    let result = runtime.execute(&create_test_task(Priority::High)).await;

    assert!(result.is_success());
    assert_eq!(result.metrics().attempts_count, 2);
    let placement = result.placement().expect("placement");
    assert_eq!(placement.source_domain, "seventy.example");
    assert!((placement.quality_score - 80.0).abs() < 1e-9);
    assert_eq!(placement.domain_authority, 70.0);
}

#[tokio::test]
async fn test_no_opportunities_is_retried() {
    let harness = create_harness(
        test_config(EngineSettings::default().with_initial_workers(1)),
        ScriptedDiscovery {
            opportunities: Vec::new(),
            gate: None,
        },
        ScriptedGenerator::default(),
        ScriptedSubmitter::default(),
    );
    let task = create_test_task(Priority::Normal);
    let mut rx = harness.manager.subscribe();
    harness.manager.add_task(task.clone()).await.expect("add task");
    harness.manager.start().await.expect("start");

    // The requeue is announced before the failure report.
    let attempts = next_event(&mut rx, |event| match event {
        SchedulerEvent::TaskRetried {
            task_id, attempts, ..
        } if task_id == task.id => Some(attempts),
        _ => None,
    })
    .await;
    assert_eq!(attempts, 1);

    let (code, retryable, will_retry) = next_event(&mut rx, |event| match event {
        SchedulerEvent::TaskFailed {
            error, will_retry, ..
        } => Some((error.code, error.retryable, will_retry)),
        _ => None,
    })
    .await;
    assert_eq!(code, ErrorCode::NoOpportunities);
    assert!(retryable);
    assert!(will_retry);

    harness.manager.stop().await.expect("stop");
    // The retry waits out the cooldown before it is due again.
    assert_eq!(harness.store.len(&task.partition()).await.expect("len"), 1);
}

#[tokio::test]
async fn test_mixed_submission_failures_stay_retryable() {
    let harness = create_harness(
        test_config(EngineSettings::default().with_initial_workers(1)),
        ScriptedDiscovery {
            opportunities: vec![opportunity("flaky.example", 80.0), opportunity("locked.example", 60.0)],
            gate: None,
        },
        ScriptedGenerator::default(),
        ScriptedSubmitter {
            failures: HashMap::from([
                ("flaky.example".to_string(), 500),
                ("locked.example".to_string(), 401),
            ]),
        },
    );
    let mut rx = harness.manager.subscribe();
    harness
        .manager
        .add_task(create_test_task(Priority::Normal))
        .await
        .expect("add task");
    harness.manager.start().await.expect("start");

    let error = next_event(&mut rx, |event| match event {
        SchedulerEvent::TaskFailed { error, .. } => Some(error),
        _ => None,
    })
    .await;
    harness.manager.stop().await.expect("stop");

    assert_eq!(error.code, ErrorCode::OpportunitiesExhausted);
    assert!(error.retryable);
    assert!(harness.verifier.requests.lock().expect("requests lock").is_empty());
}

#[tokio::test]
async fn test_partitions_drain_in_priority_order() {
    let harness = create_harness(
        test_config(
            EngineSettings::default()
                .with_max_concurrency(1)
                .with_initial_workers(1),
        ),
        ScriptedDiscovery {
            opportunities: vec![opportunity("blog.example", 70.0)],
            gate: None,
        },
        ScriptedGenerator::default(),
        ScriptedSubmitter::default(),
    );

    let mut expected = Vec::new();
    for priority in [Priority::Low, Priority::Normal, Priority::Urgent, Priority::High] {
        let task = create_test_task(priority);
        expected.push((priority, task.id));
        harness.manager.add_task(task).await.expect("add task");
    }
    // Priority orders urgent first.
    expected.sort_by_key(|(priority, _)| *priority);

    let mut rx = harness.manager.subscribe();
    harness.manager.start().await.expect("start");

    let mut completed = Vec::new();
    while completed.len() < expected.len() {
        let id = next_event(&mut rx, |event| match event {
            SchedulerEvent::TaskCompleted { task_id, .. } => Some(task_id),
            _ => None,
        })
        .await;
        completed.push(id);
    }
    harness.manager.stop().await.expect("stop");

    let expected_ids: Vec<Uuid> = expected.into_iter().map(|(_, id)| id).collect();
    assert_eq!(completed, expected_ids);
}

#[tokio::test]
async fn test_retries_stop_at_configured_attempts() {
    let harness = create_harness(
        test_config(
            EngineSettings::default()
                .with_initial_workers(1)
                .with_retry_attempts(2)
                .with_retry_delay(Duration::ZERO)
                .with_cooldown(Duration::ZERO),
        ),
        ScriptedDiscovery {
            opportunities: Vec::new(),
            gate: None,
        },
        ScriptedGenerator::default(),
        ScriptedSubmitter::default(),
    );
    let task = create_test_task(Priority::Urgent);
    let mut rx = harness.manager.subscribe();
    harness.manager.add_task(task.clone()).await.expect("add task");
    harness.manager.start().await.expect("start");

    let mut outcomes = Vec::new();
    while outcomes.last() != Some(&false) {
        let will_retry = next_event(&mut rx, |event| match event {
            SchedulerEvent::TaskFailed {
                task_id, will_retry, ..
            } if task_id == task.id => Some(will_retry),
            _ => None,
        })
        .await;
        outcomes.push(will_retry);
    }
    harness.manager.stop().await.expect("stop");

    assert_eq!(outcomes, vec![true, true, false]);
    let partition = task.partition();
    assert_eq!(harness.store.len(&partition).await.expect("len"), 0);
    assert_eq!(harness.store.counters(&partition).await.expect("counters").failed, 3);
}

#[tokio::test]
async fn test_backlog_scales_workers_up() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = create_harness(
        test_config(
            EngineSettings::default()
                .with_max_concurrency(4)
                .with_initial_workers(1),
        ),
        ScriptedDiscovery {
            opportunities: vec![opportunity("blog.example", 70.0)],
            gate: Some(gate.clone()),
        },
        ScriptedGenerator::default(),
        ScriptedSubmitter::default(),
    );
    for _ in 0..25 {
        harness
            .manager
            .add_task(create_test_task(Priority::Normal))
            .await
            .expect("add task");
    }

    harness.manager.start().await.expect("start");
    assert_eq!(harness.manager.worker_status().len(), 1);

    let mut rx = harness.manager.subscribe();
    harness.manager.monitor_tick().await.expect("monitor tick");

    // ceil(backlog / 10) = 3 workers wanted, bounded by max_concurrency 4.
    let scaled = next_event(&mut rx, |event| match event {
        SchedulerEvent::WorkersScaled { from, to, .. } => Some((from, to)),
        _ => None,
    })
    .await;
    assert_eq!(scaled, (1, 3));
    assert_eq!(harness.manager.worker_status().len(), 3);

    gate.add_permits(100);
    harness.manager.stop().await.expect("stop");

    let partition = PartitionKey::new(ENGINE.into(), Priority::Normal);
    assert_eq!(harness.store.leased(&partition).await.expect("leased"), 0);
}
