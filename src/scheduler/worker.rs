//! Queue workers.
//!
//! A worker is bound to one engine type and processes exactly one task at a
//! time. Each loop iteration polls the engine's partitions in strict priority
//! order (`urgent`, `high`, `normal`, `low`), runs the first task found
//! through the engine pipeline and then settles it in the store: `ack` on
//! success or terminal failure, an atomic `requeue` for a retry.
//!
//! Stopping is cooperative. A stop request is seen between tasks or while
//! idle; a task already in flight always runs to completion.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{EventBus, SchedulerEvent};
use super::retry::{plan_retry, RetryDecision};
use crate::config::SchedulerConfig;
use crate::engine::EngineRuntime;
use crate::error::StoreError;
use crate::metrics::MetricsCollector;
use crate::model::{
    EngineTask, EngineType, ErrorCode, LinkPlacementResult, PartitionKey, PipelineMetrics,
    ResultError,
};
use crate::store::{LeasedTask, QueueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
    /// The last task crashed or the store failed; the worker backs off.
    Error,
    Stopped,
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub id: String,
    pub engine_type: EngineType,
    pub status: WorkerState,
    pub current_task: Option<Uuid>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub last_heartbeat: DateTime<Utc>,
}

/// Timing knobs of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Sleep after an empty poll across all partitions.
    pub idle_poll: Duration,
    /// Pause after a crashed task or a store failure.
    pub error_backoff: Duration,
    /// Lease on a popped task and upper bound of one execution.
    pub lease_timeout: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            idle_poll: config.idle_poll_interval(),
            error_backoff: config.error_backoff(),
            lease_timeout: config.lease_timeout(),
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

type SharedStatus = Arc<Mutex<WorkerStatus>>;

fn lock(status: &SharedStatus) -> MutexGuard<'_, WorkerStatus> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

fn snapshot(status: &SharedStatus) -> WorkerStatus {
    let mut current = lock(status).clone();
    current.uptime_secs = (Utc::now() - current.started_at).num_seconds().max(0) as u64;
    current
}

/// A single consumer of one engine type's partitions.
pub struct Worker {
    id: String,
    runtime: Arc<EngineRuntime>,
    store: Arc<dyn QueueStore>,
    events: EventBus,
    options: WorkerOptions,
    partitions: Vec<PartitionKey>,
    status: SharedStatus,
    stop_tx: Option<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    metrics: MetricsCollector,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        runtime: Arc<EngineRuntime>,
        store: Arc<dyn QueueStore>,
        events: EventBus,
        options: WorkerOptions,
    ) -> Self {
        let id = id.into();
        let engine_type = runtime.engine_type();
        let now = Utc::now();
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            status: Arc::new(Mutex::new(WorkerStatus {
                id: id.clone(),
                engine_type: engine_type.clone(),
                status: WorkerState::Idle,
                current_task: None,
                tasks_completed: 0,
                tasks_failed: 0,
                started_at: now,
                uptime_secs: 0,
                last_heartbeat: now,
            })),
            partitions: PartitionKey::all_for(&engine_type),
            id,
            runtime,
            store,
            events,
            options,
            stop_tx: Some(stop_tx),
            stop_rx,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> WorkerStatus {
        snapshot(&self.status)
    }

    /// Runs the worker loop on the tokio runtime.
    pub fn spawn(mut self) -> WorkerHandle {
        let stop_tx = self.stop_tx.take();
        let id = self.id.clone();
        let engine_type = self.runtime.engine_type();
        let status = Arc::clone(&self.status);
        let join = tokio::spawn(self.run());

        WorkerHandle {
            id,
            engine_type,
            status,
            stop_tx,
            join,
        }
    }

    /// Polls once and processes the task found, if any.
    ///
    /// Returns whether a task was processed.
    pub async fn process_next(&self) -> Result<bool, StoreError> {
        self.heartbeat();
        match self.poll().await? {
            Some(leased) => {
                self.process(leased).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn run(mut self) {
        info!(worker_id = %self.id, engine = %self.runtime.engine_type(), "Worker started");

        while !self.stop_requested() {
            self.heartbeat();
            match self.poll().await {
                Ok(Some(leased)) => {
                    if self.process(leased).await {
                        self.pause(self.options.error_backoff).await;
                    }
                }
                Ok(None) => {
                    debug!(worker_id = %self.id, "No tasks available");
                    self.set_state(WorkerState::Idle);
                    self.pause(self.options.idle_poll).await;
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to poll queue");
                    self.set_state(WorkerState::Error);
                    self.events.emit(SchedulerEvent::WorkerError {
                        worker_id: self.id.clone(),
                        engine_type: self.runtime.engine_type(),
                        message: e.to_string(),
                    });
                    self.pause(self.options.error_backoff).await;
                }
            }
        }

        self.set_state(WorkerState::Stopped);
        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Stop was requested, or whoever could request it is gone.
    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow() || self.stop_rx.has_changed().is_err()
    }

    /// Sleeps for `duration` unless a stop request arrives first.
    async fn pause(&mut self, duration: Duration) {
        if self.stop_requested() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop_rx.changed() => {}
        }
    }

    async fn poll(&self) -> Result<Option<LeasedTask>, StoreError> {
        for partition in &self.partitions {
            if let Some(leased) = self.store.pop(partition, self.options.lease_timeout).await? {
                return Ok(Some(leased));
            }
        }
        Ok(None)
    }

    /// Executes and settles one leased task. Returns whether the pipeline
    /// crashed or timed out.
    async fn process(&self, leased: LeasedTask) -> bool {
        let task = &leased.task;
        let engine_type = self.runtime.engine_type();

        self.update(|status| {
            status.status = WorkerState::Busy;
            status.current_task = Some(task.id);
        });
        self.metrics.inc_tasks_in_progress();

        info!(
            worker_id = %self.id,
            task_id = %task.id,
            partition = %leased.partition,
            attempt = task.attempts + 1,
            "Processing task"
        );

        let started = Instant::now();
        let (result, crashed) = self.execute(task, started).await;
        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        self.metrics.dec_tasks_in_progress();

        if let Err(e) = self
            .store
            .record_outcome(&leased.partition, result.is_success(), duration_ms)
            .await
        {
            warn!(worker_id = %self.id, task_id = %task.id, error = %e, "Failed to record task outcome");
        }

        if result.is_success() {
            self.release(&leased).await;
            self.metrics
                .record_task(engine_type.as_str(), "success", elapsed.as_secs_f64());
            self.events.emit(SchedulerEvent::TaskCompleted {
                task_id: task.id,
                worker_id: self.id.clone(),
                engine_type: engine_type.clone(),
                processing_time_ms: duration_ms,
                placement_url: result
                    .placement()
                    .map(|p| p.source_url.clone())
                    .unwrap_or_default(),
            });
            info!(worker_id = %self.id, task_id = %task.id, duration_ms = duration_ms, "Task completed");
            self.update(|status| status.tasks_completed += 1);
        } else {
            let error = result.error().cloned().unwrap_or_else(|| {
                ResultError::new(ErrorCode::EngineError, "Failure without error details", true)
            });
            let will_retry = self.settle_failure(&leased, &result).await;

            self.metrics.record_task(
                engine_type.as_str(),
                if will_retry { "retry" } else { "failure" },
                elapsed.as_secs_f64(),
            );
            warn!(
                worker_id = %self.id,
                task_id = %task.id,
                code = %error.code,
                error = %error.message,
                will_retry = will_retry,
                "Task failed"
            );
            self.events.emit(SchedulerEvent::TaskFailed {
                task_id: task.id,
                worker_id: self.id.clone(),
                engine_type,
                error,
                will_retry,
            });
            self.update(|status| status.tasks_failed += 1);
        }

        self.update(|status| {
            status.status = if crashed {
                WorkerState::Error
            } else {
                WorkerState::Idle
            };
            status.current_task = None;
        });
        crashed
    }

    /// Requeues or releases a failed task. Returns whether it will run again.
    async fn settle_failure(&self, leased: &LeasedTask, result: &LinkPlacementResult) -> bool {
        let task = &leased.task;
        match plan_retry(task, result, self.runtime.settings(), Utc::now()) {
            RetryDecision::Retry(next) => match self.store.requeue(leased, &next).await {
                Ok(true) => {
                    let scheduled_for = next.scheduled_for.unwrap_or_else(Utc::now);
                    info!(
                        worker_id = %self.id,
                        task_id = %task.id,
                        attempts = next.attempts,
                        scheduled_for = %scheduled_for,
                        "Task requeued for retry"
                    );
                    self.events.emit(SchedulerEvent::TaskRetried {
                        task_id: task.id,
                        attempts: next.attempts,
                        scheduled_for,
                    });
                    true
                }
                Ok(false) => {
                    warn!(worker_id = %self.id, task_id = %task.id, "Lease expired before retry, task was reclaimed");
                    true
                }
                Err(e) => {
                    error!(
                        worker_id = %self.id,
                        task_id = %task.id,
                        error = %e,
                        "Failed to requeue task, it stays leased until reclaimed"
                    );
                    self.events.emit(SchedulerEvent::WorkerError {
                        worker_id: self.id.clone(),
                        engine_type: self.runtime.engine_type(),
                        message: e.to_string(),
                    });
                    true
                }
            },
            RetryDecision::Terminal => {
                self.release(leased).await;
                false
            }
        }
    }

    async fn release(&self, leased: &LeasedTask) {
        match self.store.ack(leased).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(worker_id = %self.id, task_id = %leased.task.id, "Lease expired before ack, task may run again")
            }
            Err(e) => {
                error!(worker_id = %self.id, task_id = %leased.task.id, error = %e, "Failed to ack task")
            }
        }
    }

    /// Runs the pipeline, turning panics and timeouts into retryable failures.
    async fn execute(&self, task: &EngineTask, started: Instant) -> (LinkPlacementResult, bool) {
        let run = AssertUnwindSafe(self.runtime.execute(task)).catch_unwind();

        let error = match tokio::time::timeout(self.options.lease_timeout, run).await {
            Ok(Ok(result)) => return (result, false),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(worker_id = %self.id, task_id = %task.id, panic = %message, "Engine pipeline panicked");
                self.events.emit(SchedulerEvent::WorkerError {
                    worker_id: self.id.clone(),
                    engine_type: self.runtime.engine_type(),
                    message: format!("pipeline panicked: {}", message),
                });
                ResultError::new(
                    ErrorCode::EngineError,
                    format!("Engine pipeline panicked: {}", message),
                    true,
                )
            }
            Err(_) => {
                warn!(
                    worker_id = %self.id,
                    task_id = %task.id,
                    timeout_secs = self.options.lease_timeout.as_secs_f64(),
                    "Engine pipeline timed out"
                );
                ResultError::new(
                    ErrorCode::EngineTimeout,
                    format!(
                        "Engine pipeline exceeded {:?}",
                        self.options.lease_timeout
                    ),
                    true,
                )
            }
        };

        let metrics = PipelineMetrics {
            processing_time_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };
        (LinkPlacementResult::failure(error, metrics), true)
    }

    fn heartbeat(&self) {
        self.update(|status| status.last_heartbeat = Utc::now());
    }

    fn set_state(&self, state: WorkerState) {
        self.update(|status| status.status = state);
    }

    fn update(&self, f: impl FnOnce(&mut WorkerStatus)) {
        f(&mut lock(&self.status));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Control side of a spawned worker.
pub struct WorkerHandle {
    id: String,
    engine_type: EngineType,
    status: SharedStatus,
    stop_tx: Option<watch::Sender<bool>>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn engine_type(&self) -> &EngineType {
        &self.engine_type
    }

    pub fn status(&self) -> WorkerStatus {
        snapshot(&self.status)
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.status).status == WorkerState::Idle
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Asks the worker to exit once its current task, if any, is done.
    pub fn stop(&self) {
        if let Some(stop_tx) = &self.stop_tx {
            let _ = stop_tx.send(true);
        }
    }

    /// Waits for the worker loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(worker_id = %self.id, error = %e, "Worker task panicked");
            lock(&self.status).status = WorkerState::Stopped;
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("engine_type", &self.engine_type)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::engine::{Engine, MetadataQualityAssessor, VerificationRequest, VerificationScheduler};
    use crate::error::EngineError;
    use crate::model::{
        ContentFormat, GeneratedContent, PlacementOpportunity, PlacementType, Priority,
        SubmissionResult,
    };
    use crate::store::MemoryQueueStore;
    use async_trait::async_trait;

    const ENGINE: &str = "blog_comments";

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Succeed,
        NoOpportunities,
        Panic,
        Hang,
    }

    struct TestEngine {
        mode: Mode,
        placed: Mutex<Vec<Priority>>,
    }

    impl TestEngine {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                placed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Engine for TestEngine {
        fn engine_type(&self) -> EngineType {
            EngineType::new(ENGINE)
        }

        async fn discover(&self, task: &EngineTask) -> Result<Vec<PlacementOpportunity>, EngineError> {
            match self.mode {
                Mode::Panic => panic!("discovery exploded for {}", task.id),
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
                Mode::NoOpportunities => Ok(Vec::new()),
                Mode::Succeed => Ok(vec![PlacementOpportunity::new(
                    "blog.io",
                    "https://blog.io/post",
                    PlacementType::BlogComment,
                )
                .with_authority(50.0, 40.0)
                .with_cost(1.0)]),
            }
        }

        async fn generate(
            &self,
            _opportunity: &PlacementOpportunity,
            _task: &EngineTask,
        ) -> Result<GeneratedContent, EngineError> {
            let mut content = GeneratedContent::new("Rust scheduling is fun.", ContentFormat::Html);
            content.metadata.quality_score = 0.9;
            Ok(content)
        }

        async fn submit(
            &self,
            _content: &GeneratedContent,
            _opportunity: &PlacementOpportunity,
            task: &EngineTask,
        ) -> Result<SubmissionResult, EngineError> {
            self.placed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(task.priority);
            Ok(SubmissionResult::published("https://blog.io/post#c1", "c1"))
        }
    }

    struct NoopVerifier;

    #[async_trait]
    impl VerificationScheduler for NoopVerifier {
        async fn schedule(&self, _request: VerificationRequest) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn create_worker(
        engine: Arc<TestEngine>,
        settings: EngineSettings,
        options: WorkerOptions,
    ) -> (Worker, Arc<MemoryQueueStore>, EventBus) {
        let store = Arc::new(MemoryQueueStore::new());
        let runtime = EngineRuntime::new(
            engine,
            settings,
            store.clone(),
            "test",
            Arc::new(MetadataQualityAssessor),
            Arc::new(NoopVerifier),
        );
        let events = EventBus::new(64);
        let worker = Worker::new(
            "worker-0",
            Arc::new(runtime),
            store.clone(),
            events.clone(),
            options,
        );
        (worker, store, events)
    }

    fn create_test_task(priority: Priority) -> EngineTask {
        EngineTask::new("campaign", "user", ENGINE, "https://target.io/page", "scheduling")
            .with_keywords(["rust"])
            .with_priority(priority)
    }

    fn partition(priority: Priority) -> PartitionKey {
        PartitionKey::new(EngineType::new(ENGINE), priority)
    }

    #[tokio::test]
    async fn test_polls_partitions_in_priority_order() {
        let engine = TestEngine::new(Mode::Succeed);
        let (worker, store, _) =
            create_worker(engine.clone(), EngineSettings::default(), WorkerOptions::default());

        for priority in [Priority::Low, Priority::Normal, Priority::High, Priority::Urgent] {
            store
                .push(&create_test_task(priority))
                .await
                .expect("push should succeed");
        }

        while worker.process_next().await.expect("poll should succeed") {}

        let placed = engine.placed.lock().unwrap_or_else(|e| e.into_inner()).clone();
        assert_eq!(placed, Priority::ALL.to_vec());

        let status = worker.status();
        assert_eq!(status.tasks_completed, 4);
        assert_eq!(status.status, WorkerState::Idle);
        assert!(status.current_task.is_none());
    }

    #[tokio::test]
    async fn test_success_acks_and_records_outcome() {
        let (worker, store, events) = create_worker(
            TestEngine::new(Mode::Succeed),
            EngineSettings::default(),
            WorkerOptions::default(),
        );
        let mut rx = events.subscribe();
        let task = create_test_task(Priority::Normal);
        store.push(&task).await.expect("push should succeed");

        assert!(worker.process_next().await.expect("poll should succeed"));

        let part = partition(Priority::Normal);
        assert_eq!(store.len(&part).await.expect("len"), 0);
        assert_eq!(store.leased(&part).await.expect("leased"), 0);
        assert_eq!(store.counters(&part).await.expect("counters").completed, 1);

        match rx.recv().await.expect("event") {
            SchedulerEvent::TaskCompleted {
                task_id,
                placement_url,
                ..
            } => {
                assert_eq!(task_id, task.id);
                assert_eq!(placement_url, "https://blog.io/post#c1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retryable_failure_is_requeued() {
        let (worker, store, events) = create_worker(
            TestEngine::new(Mode::NoOpportunities),
            EngineSettings::default(),
            WorkerOptions::default(),
        );
        let mut rx = events.subscribe();
        store
            .push(&create_test_task(Priority::High))
            .await
            .expect("push should succeed");

        assert!(worker.process_next().await.expect("poll should succeed"));

        let part = partition(Priority::High);
        // Waiting in the delayed set until the cooldown ends.
        assert_eq!(store.len(&part).await.expect("len"), 1);
        assert_eq!(store.leased(&part).await.expect("leased"), 0);
        assert!(store
            .pop(&part, Duration::from_secs(60))
            .await
            .expect("pop")
            .is_none());
        assert_eq!(store.counters(&part).await.expect("counters").failed, 1);

        let retried = rx.recv().await.expect("event");
        assert!(matches!(retried, SchedulerEvent::TaskRetried { attempts: 1, .. }));
        let failed = rx.recv().await.expect("event");
        match failed {
            SchedulerEvent::TaskFailed {
                error, will_retry, ..
            } => {
                assert!(will_retry);
                assert_eq!(error.code, ErrorCode::NoOpportunities);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(worker.status().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_released() {
        let (worker, store, events) = create_worker(
            TestEngine::new(Mode::NoOpportunities),
            EngineSettings::default().with_retry_attempts(0),
            WorkerOptions::default(),
        );
        let mut rx = events.subscribe();
        store
            .push(&create_test_task(Priority::Low))
            .await
            .expect("push should succeed");

        assert!(worker.process_next().await.expect("poll should succeed"));

        let part = partition(Priority::Low);
        assert_eq!(store.len(&part).await.expect("len"), 0);
        assert_eq!(store.leased(&part).await.expect("leased"), 0);
        assert!(matches!(
            rx.recv().await.expect("event"),
            SchedulerEvent::TaskFailed {
                will_retry: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_panicking_pipeline_becomes_engine_error() {
        let (worker, store, events) = create_worker(
            TestEngine::new(Mode::Panic),
            EngineSettings::default(),
            WorkerOptions::default(),
        );
        let mut rx = events.subscribe();
        store
            .push(&create_test_task(Priority::Normal))
            .await
            .expect("push should succeed");

        assert!(worker.process_next().await.expect("poll should succeed"));

        assert!(matches!(
            rx.recv().await.expect("event"),
            SchedulerEvent::WorkerError { .. }
        ));
        let mut failure = None;
        while let Ok(event) = rx.try_recv() {
            if let SchedulerEvent::TaskFailed { error, .. } = event {
                failure = Some(error);
            }
        }
        let failure = failure.expect("task failure event");
        assert_eq!(failure.code, ErrorCode::EngineError);
        assert!(failure.retryable);
        assert_eq!(worker.status().status, WorkerState::Error);
        assert_eq!(store.len(&partition(Priority::Normal)).await.expect("len"), 1);
    }

    #[tokio::test]
    async fn test_execution_bounded_by_lease_timeout() {
        let options = WorkerOptions {
            lease_timeout: Duration::from_millis(50),
            ..WorkerOptions::default()
        };
        let (worker, store, events) =
            create_worker(TestEngine::new(Mode::Hang), EngineSettings::default(), options);
        let mut rx = events.subscribe();
        store
            .push(&create_test_task(Priority::Normal))
            .await
            .expect("push should succeed");

        assert!(worker.process_next().await.expect("poll should succeed"));

        let mut failure = None;
        while let Ok(event) = rx.try_recv() {
            if let SchedulerEvent::TaskFailed { error, .. } = event {
                failure = Some(error);
            }
        }
        let failure = failure.expect("task failure event");
        assert_eq!(failure.code, ErrorCode::EngineTimeout);
        assert!(failure.retryable);
    }

    #[tokio::test]
    async fn test_spawned_worker_stops_when_asked() {
        let options = WorkerOptions {
            idle_poll: Duration::from_millis(10),
            ..WorkerOptions::default()
        };
        let (worker, store, _) =
            create_worker(TestEngine::new(Mode::Succeed), EngineSettings::default(), options);
        store
            .push(&create_test_task(Priority::Urgent))
            .await
            .expect("push should succeed");

        let handle = worker.spawn();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.status().tasks_completed == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.status().tasks_completed, 1);

        handle.stop();
        let status = handle.status.clone();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("worker should stop");
        assert_eq!(lock(&status).status, WorkerState::Stopped);
    }
}
