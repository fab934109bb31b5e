//! Command-line interface for placement-scheduler.
//!
//! Provides operator commands for enqueueing tasks, inspecting partitions,
//! reclaiming expired leases and printing the effective configuration.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
