//! The queue manager.
//!
//! Owns one worker pool per engine type and the monitoring loop. Engines are
//! handed in at construction as [`EngineRuntime`]s; there is no global
//! registry. Each monitoring tick reclaims expired leases, recomputes the
//! per-partition [`QueueMetrics`], scales the pools and raises alerts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::alerts::evaluate_alerts;
use super::autoscale::{plan_scaling, ScaleDecision};
use super::events::{EventBus, SchedulerEvent};
use super::stats::QueueMetrics;
use super::worker::{Worker, WorkerHandle, WorkerOptions, WorkerStatus};
use crate::config::SchedulerConfig;
use crate::engine::EngineRuntime;
use crate::error::ManagerError;
use crate::metrics::MetricsCollector;
use crate::model::{EngineTask, EngineType, PartitionKey};
use crate::store::QueueStore;

#[derive(Default)]
struct Pools {
    active: BTreeMap<EngineType, Vec<WorkerHandle>>,
    /// Workers asked to stop by scale-down, still finishing.
    retiring: Vec<WorkerHandle>,
}

struct Monitor {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct QueueManager {
    config: SchedulerConfig,
    store: Arc<dyn QueueStore>,
    runtimes: BTreeMap<EngineType, Arc<EngineRuntime>>,
    events: EventBus,
    pools: Mutex<Pools>,
    monitor: Mutex<Option<Monitor>>,
    running: AtomicBool,
    next_worker: AtomicU64,
    metrics: MetricsCollector,
}

impl QueueManager {
    /// Creates a manager for the given engines. A later runtime for the same
    /// engine type replaces an earlier one.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn QueueStore>,
        runtimes: impl IntoIterator<Item = EngineRuntime>,
    ) -> Self {
        let runtimes = runtimes
            .into_iter()
            .map(|runtime| (runtime.engine_type(), Arc::new(runtime)))
            .collect();
        let events = EventBus::new(config.event_capacity);

        Self {
            config,
            store,
            runtimes,
            events,
            pools: Mutex::new(Pools::default()),
            monitor: Mutex::new(None),
            running: AtomicBool::new(false),
            next_worker: AtomicU64::new(0),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn engine_types(&self) -> Vec<EngineType> {
        self.runtimes.keys().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Enqueues `task` into its partition.
    pub async fn add_task(&self, task: EngineTask) -> Result<Uuid, ManagerError> {
        if !self.runtimes.contains_key(&task.engine_type) {
            return Err(ManagerError::UnknownEngine(task.engine_type.to_string()));
        }

        self.store.push(&task).await?;

        let partition = task.partition();
        info!(task_id = %task.id, partition = %partition, "Task added");
        self.events.emit(SchedulerEvent::TaskAdded {
            task_id: task.id,
            partition: partition.to_string(),
        });
        Ok(task.id)
    }

    /// Snapshot of every partition of every registered engine.
    pub async fn queue_stats(&self) -> Result<BTreeMap<PartitionKey, QueueMetrics>, ManagerError> {
        let now = Utc::now();
        let mut stats = BTreeMap::new();

        for engine_type in self.runtimes.keys() {
            for partition in PartitionKey::all_for(engine_type) {
                let queue_length = self.store.len(&partition).await?;
                let ready = self.store.ready_len(&partition).await?;
                let active = self.store.leased(&partition).await?;
                let counters = self.store.counters(&partition).await?;
                stats.insert(
                    partition.clone(),
                    QueueMetrics::new(partition, queue_length, ready, active, counters, now),
                );
            }
        }

        Ok(stats)
    }

    pub fn worker_status(&self) -> Vec<WorkerStatus> {
        let pools = self.lock_pools();
        pools
            .active
            .values()
            .flatten()
            .chain(pools.retiring.iter())
            .map(|handle| handle.status())
            .collect()
    }

    /// Returns tasks of crashed workers to their partitions.
    pub async fn reclaim_expired(&self) -> Result<usize, ManagerError> {
        let mut reclaimed = 0;
        for engine_type in self.runtimes.keys() {
            for partition in PartitionKey::all_for(engine_type) {
                let count = self.store.reclaim_expired(&partition).await?;
                if count > 0 {
                    warn!(partition = %partition, count = count, "Reclaimed expired leases");
                }
                reclaimed += count;
            }
        }
        Ok(reclaimed)
    }

    /// One monitoring pass: reclaim, metrics, autoscaling, alerts.
    pub async fn monitor_tick(&self) -> Result<(), ManagerError> {
        self.reclaim_expired().await?;

        let stats = self.queue_stats().await?;
        for metrics in stats.values() {
            self.metrics
                .update_queue_depth(&metrics.partition.to_string(), metrics.queue_length);
        }

        if self.is_running() {
            self.autoscale(&stats);
        }

        let snapshot: Vec<QueueMetrics> = stats.into_values().collect();
        for alert in evaluate_alerts(&snapshot, &self.config.alert_thresholds, Utc::now()) {
            warn!(
                kind = %alert.kind,
                queue = %alert.queue,
                value = alert.value,
                threshold = alert.threshold,
                "Queue alert"
            );
            self.metrics.record_alert(alert.kind.as_str());
            self.events.emit(SchedulerEvent::Alert(alert));
        }

        self.events
            .emit(SchedulerEvent::MetricsUpdated { stats: snapshot });
        Ok(())
    }

    /// Starts the configured workers and the monitoring loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), ManagerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ManagerError::AlreadyRunning);
        }

        if let Err(e) = crate::metrics::init_metrics() {
            warn!(error = %e, "Failed to register Prometheus metrics");
        }

        match self.reclaim_expired().await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered = recovered, "Recovered tasks from expired leases"),
            Err(e) => warn!(error = %e, "Failed to reclaim expired leases"),
        }

        {
            let mut pools = self.lock_pools();
            for (engine_type, runtime) in &self.runtimes {
                let count = runtime.settings().startup_workers();
                let pool = pools.active.entry(engine_type.clone()).or_default();
                for _ in 0..count {
                    pool.push(self.spawn_worker(runtime));
                }
                self.metrics.update_workers(engine_type.as_str(), pool.len());
                info!(engine = %engine_type, workers = count, "Started workers");
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(monitor_loop(
            Arc::downgrade(self),
            stop_rx,
            self.config.monitoring_interval(),
        ));
        *self.lock_monitor() = Some(Monitor { stop_tx, join });

        info!(engines = self.runtimes.len(), "Queue manager started");
        Ok(())
    }

    /// Stops monitoring and lets every worker finish its current task.
    ///
    /// Fails with [`ManagerError::ShutdownTimeout`] when workers are still
    /// busy after the configured shutdown timeout.
    pub async fn stop(&self) -> Result<(), ManagerError> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ManagerError::NotRunning);
        }

        info!("Initiating queue manager shutdown");

        let monitor = self.lock_monitor().take();
        if let Some(monitor) = &monitor {
            let _ = monitor.stop_tx.send(true);
        }

        let handles: Vec<WorkerHandle> = {
            let mut pools = self.lock_pools();
            let retiring = std::mem::take(&mut pools.retiring);
            std::mem::take(&mut pools.active)
                .into_values()
                .flatten()
                .chain(retiring)
                .collect()
        };
        for handle in &handles {
            handle.stop();
        }

        let drain = async {
            if let Some(monitor) = monitor {
                if let Err(e) = monitor.join.await {
                    error!(error = %e, "Monitoring loop panicked");
                }
            }
            for handle in handles {
                handle.join().await;
            }
        };

        let timeout = self.config.shutdown_timeout();
        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                for engine_type in self.runtimes.keys() {
                    self.metrics.update_workers(engine_type.as_str(), 0);
                }
                info!("Queue manager shutdown complete");
                Ok(())
            }
            Err(_) => Err(ManagerError::ShutdownTimeout(timeout)),
        }
    }

    fn autoscale(&self, stats: &BTreeMap<PartitionKey, QueueMetrics>) {
        let mut pools = self.lock_pools();
        let Pools { active, retiring } = &mut *pools;
        retiring.retain(|handle| !handle.is_finished());

        for (engine_type, runtime) in &self.runtimes {
            let backlog: usize = stats
                .values()
                .filter(|m| &m.partition.engine_type == engine_type)
                .map(|m| m.ready)
                .sum();

            let pool = active.entry(engine_type.clone()).or_default();
            pool.retain(|handle| {
                if handle.is_finished() {
                    warn!(worker_id = %handle.id(), "Worker exited unexpectedly");
                }
                !handle.is_finished()
            });

            let current = pool.len();
            let idle = pool.iter().filter(|h| h.is_idle()).count();
            let max = runtime.settings().max_concurrency;

            match plan_scaling(backlog, current, idle, max) {
                ScaleDecision::Hold => {
                    debug!(engine = %engine_type, backlog = backlog, workers = current, "No scaling needed");
                }
                ScaleDecision::Add(count) => {
                    for _ in 0..count {
                        pool.push(self.spawn_worker(runtime));
                    }
                    info!(engine = %engine_type, backlog = backlog, from = current, to = pool.len(), "Scaled workers up");
                }
                ScaleDecision::Remove(count) => {
                    let mut removed = 0;
                    let mut kept = Vec::with_capacity(pool.len());
                    for handle in pool.drain(..) {
                        if removed < count && handle.is_idle() {
                            handle.stop();
                            retiring.push(handle);
                            removed += 1;
                        } else {
                            kept.push(handle);
                        }
                    }
                    *pool = kept;
                    info!(engine = %engine_type, backlog = backlog, from = current, to = pool.len(), "Scaled workers down");
                }
            }

            if pool.len() != current {
                self.events.emit(SchedulerEvent::WorkersScaled {
                    engine_type: engine_type.clone(),
                    from: current,
                    to: pool.len(),
                });
            }
            self.metrics.update_workers(engine_type.as_str(), pool.len());
        }
    }

    fn spawn_worker(&self, runtime: &Arc<EngineRuntime>) -> WorkerHandle {
        let n = self.next_worker.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-worker-{}", runtime.engine_type(), n);
        Worker::new(
            id,
            Arc::clone(runtime),
            Arc::clone(&self.store),
            self.events.clone(),
            WorkerOptions::from_config(&self.config),
        )
        .spawn()
    }

    fn lock_pools(&self) -> MutexGuard<'_, Pools> {
        self.pools.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_monitor(&self) -> MutexGuard<'_, Option<Monitor>> {
        self.monitor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("engines", &self.runtimes.keys().collect::<Vec<_>>())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn monitor_loop(
    manager: Weak<QueueManager>,
    mut stop_rx: watch::Receiver<bool>,
    period: std::time::Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        if let Err(e) = manager.monitor_tick().await {
            error!(error = %e, "Monitoring tick failed");
        }
    }

    debug!("Monitoring loop stopped");
}
