//! Operator commands for placement-scheduler.
//!
//! These commands talk to the Redis queue store directly; they do not start
//! any workers.

use crate::config::SchedulerConfig;
use crate::model::{EngineTask, EngineType, Priority, TaskRequirements};
use crate::scheduler::QueueMetrics;
use crate::store::{PartitionKey, QueueStore, RedisQueueStore};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Operator tooling for the link placement scheduler.
#[derive(Parser)]
#[command(name = "placement-scheduler")]
#[command(about = "Inspect and feed the link placement task queues")]
#[command(version)]
#[command(
    long_about = "placement-scheduler manages the priority-partitioned task queues of the link placement scheduler.\n\nConfiguration is read from a YAML file (--config) and PLACEMENT_* environment variables.\n\nExample usage:\n  placement-scheduler --config scheduler.yaml enqueue --file task.json\n  placement-scheduler stats --engine web2_platforms"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// YAML configuration file. Without it, configuration comes from the environment.
    #[arg(short, long, global = true, env = "PLACEMENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Push tasks from a JSON file into their partitions.
    #[command(alias = "add")]
    Enqueue(EnqueueArgs),

    /// Print per-partition queue length and counters.
    Stats(StatsArgs),

    /// Return expired leases to their partitions.
    Reclaim(ReclaimArgs),

    /// Print the effective configuration as YAML.
    Config,
}

/// Arguments for `placement-scheduler enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// JSON file holding one task object or an array of them.
    #[arg(short, long)]
    pub file: PathBuf,
}

/// Arguments for `placement-scheduler stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Engine types to report. Defaults to the engines in the configuration.
    #[arg(short, long)]
    pub engine: Vec<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `placement-scheduler reclaim`.
#[derive(Parser, Debug)]
pub struct ReclaimArgs {
    /// Engine types to reclaim. Defaults to the engines in the configuration.
    #[arg(short, long)]
    pub engine: Vec<String>,
}

/// A task as written by an operator; identity and timestamps are assigned on
/// enqueue.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskInput {
    campaign_id: String,
    user_id: String,
    engine_type: String,
    #[serde(default)]
    priority: Priority,
    target_url: String,
    anchor_text: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    niche: Vec<String>,
    #[serde(default)]
    requirements: TaskRequirements,
    #[serde(default)]
    scheduled_for: Option<DateTime<Utc>>,
}

impl TaskInput {
    fn into_task(self) -> EngineTask {
        let mut task = EngineTask::new(
            self.campaign_id,
            self.user_id,
            self.engine_type.as_str(),
            self.target_url,
            self.anchor_text,
        )
        .with_priority(self.priority)
        .with_keywords(self.keywords)
        .with_niche(self.niche)
        .with_requirements(self.requirements);
        if let Some(at) = self.scheduled_for {
            task = task.with_scheduled_for(at);
        }
        task
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Many(Vec<TaskInput>),
    One(Box<TaskInput>),
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Enqueue(args) => run_enqueue_command(&config, args).await?,
        Commands::Stats(args) => run_stats_command(&config, args).await?,
        Commands::Reclaim(args) => run_reclaim_command(&config, args).await?,
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => SchedulerConfig::from_env().context("Invalid PLACEMENT_* environment"),
    }
}

async fn connect_store(config: &SchedulerConfig) -> anyhow::Result<RedisQueueStore> {
    RedisQueueStore::connect(&config.redis_url, &config.key_prefix)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))
}

/// Engine types named on the command line, else those configured.
fn resolve_engines(config: &SchedulerConfig, requested: &[String]) -> anyhow::Result<Vec<EngineType>> {
    let engines: Vec<EngineType> = if requested.is_empty() {
        config.engines.keys().map(|name| EngineType::new(name.as_str())).collect()
    } else {
        requested.iter().map(|name| EngineType::new(name.as_str())).collect()
    };

    if engines.is_empty() {
        anyhow::bail!("No engine types configured; pass --engine <type>");
    }
    Ok(engines)
}

fn read_tasks(path: &Path) -> anyhow::Result<Vec<EngineTask>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed: TaskFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid task JSON in {}", path.display()))?;

    let inputs = match parsed {
        TaskFile::Many(inputs) => inputs,
        TaskFile::One(input) => vec![*input],
    };
    Ok(inputs.into_iter().map(TaskInput::into_task).collect())
}

/// Pushes every task from `path` into `store`.
async fn enqueue_tasks(
    store: &dyn QueueStore,
    config: &SchedulerConfig,
    path: &Path,
) -> anyhow::Result<Vec<(Uuid, PartitionKey)>> {
    let tasks = read_tasks(path)?;
    let mut enqueued = Vec::with_capacity(tasks.len());

    for task in tasks {
        if !config.engines.contains_key(task.engine_type.as_str()) {
            warn!(engine = %task.engine_type, "Engine type has no settings in the configuration");
        }
        store.push(&task).await?;
        info!(task_id = %task.id, partition = %task.partition(), "Task enqueued");
        enqueued.push((task.id, task.partition()));
    }

    Ok(enqueued)
}

/// Snapshots every partition of `engines`.
async fn collect_stats(
    store: &dyn QueueStore,
    engines: &[EngineType],
) -> anyhow::Result<Vec<QueueMetrics>> {
    let now = Utc::now();
    let mut stats = Vec::new();

    for engine_type in engines {
        for partition in PartitionKey::all_for(engine_type) {
            let queue_length = store.len(&partition).await?;
            let ready = store.ready_len(&partition).await?;
            let active = store.leased(&partition).await?;
            let counters = store.counters(&partition).await?;
            stats.push(QueueMetrics::new(
                partition,
                queue_length,
                ready,
                active,
                counters,
                now,
            ));
        }
    }

    Ok(stats)
}

async fn reclaim_partitions(store: &dyn QueueStore, engines: &[EngineType]) -> anyhow::Result<usize> {
    let mut reclaimed = 0;
    for engine_type in engines {
        for partition in PartitionKey::all_for(engine_type) {
            reclaimed += store.reclaim_expired(&partition).await?;
        }
    }
    Ok(reclaimed)
}

async fn run_enqueue_command(config: &SchedulerConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let store = connect_store(config).await?;
    let enqueued = enqueue_tasks(&store, config, &args.file).await?;

    for (id, partition) in &enqueued {
        println!("{}  {}", id, partition);
    }
    println!("Enqueued {} task(s)", enqueued.len());
    Ok(())
}

async fn run_stats_command(config: &SchedulerConfig, args: StatsArgs) -> anyhow::Result<()> {
    let engines = resolve_engines(config, &args.engine)?;
    let store = connect_store(config).await?;
    let stats = collect_stats(&store, &engines).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!(
        "{:<32} {:>8} {:>8} {:>8} {:>10} {:>8} {:>10} {:>9}",
        "PARTITION", "QUEUED", "READY", "ACTIVE", "COMPLETED", "FAILED", "AVG_MS", "SUCCESS%"
    );
    for m in &stats {
        println!(
            "{:<32} {:>8} {:>8} {:>8} {:>10} {:>8} {:>10.0} {:>9.1}",
            m.partition.to_string(),
            m.queue_length,
            m.ready,
            m.active,
            m.completed,
            m.failed,
            m.avg_processing_ms,
            m.success_rate
        );
    }
    Ok(())
}

async fn run_reclaim_command(config: &SchedulerConfig, args: ReclaimArgs) -> anyhow::Result<()> {
    let engines = resolve_engines(config, &args.engine)?;
    let store = connect_store(config).await?;
    let reclaimed = reclaim_partitions(&store, &engines).await?;

    println!("Reclaimed {} expired lease(s)", reclaimed);
    Ok(())
}
