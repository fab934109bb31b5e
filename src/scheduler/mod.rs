//! Priority-partitioned task scheduling with per-engine worker pools.
//!
//! Tasks live in one partition per `(engine type, priority)`. Each engine has a
//! pool of workers that poll its partitions in priority order, run the engine
//! pipeline and settle the outcome: ack on success, re-enqueue with a delay on
//! a retryable failure, drop on a terminal one.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │ QueueManager │── add_task ──┐
//!                      └──────┬───────┘              │
//!                  monitor    │ start/stop     ┌─────▼──────┐
//!          (reclaim, scale,   │                │ QueueStore │
//!           alerts, metrics)  │                │ engine:prio│
//!         ┌───────────────────┼────────────┐   └─────┬──────┘
//!         │                   │            │         │ lease
//!         ▼                   ▼            ▼         │
//!    ┌─────────┐         ┌─────────┐  ┌─────────┐    │
//!    │ Worker 1│         │ Worker 2│  │ Worker N│◄───┘
//!    └─────────┘         └─────────┘  └─────────┘
//! ```
//!
//! # Reliability Features
//!
//! - **Leased dequeue**: a popped task stays in a lease set until acked
//! - **Crash recovery**: expired leases are returned to their partition on
//!   start and on every monitoring tick
//! - **Bounded execution**: a pipeline run is limited to the lease timeout
//! - **Graceful shutdown**: workers finish their current task before stopping

pub mod alerts;
pub mod autoscale;
pub mod events;
pub mod manager;
pub mod retry;
pub mod stats;
pub mod worker;

pub use crate::config::RetryPolicy;
pub use alerts::{evaluate_alerts, Alert, AlertKind};
pub use autoscale::{plan_scaling, ScaleDecision};
pub use events::{EventBus, SchedulerEvent};
pub use manager::QueueManager;
pub use retry::{plan_retry, RetryDecision};
pub use stats::QueueMetrics;
pub use worker::{Worker, WorkerHandle, WorkerOptions, WorkerState, WorkerStatus};
