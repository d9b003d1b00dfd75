//! CLI command definitions for taskrow
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use clap::{Args, Parser, Subcommand};

/// Database-backed task queue with a cron scheduler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run workers, scheduler and HTTP surface (default if no subcommand given)
    Serve,

    /// Insert a PENDING task
    Submit(SubmitArgs),

    /// List tasks in one state
    List(ListArgs),

    /// Print per-state task counts
    Status,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Task name
    pub name: String,

    /// Runner key
    #[arg(short = 't', long = "type")]
    pub task_type: String,

    /// Opaque payload passed to the runner
    #[arg(short, long)]
    pub args: Option<String>,

    /// Retry budget
    #[arg(long, default_value_t = 0)]
    pub max_retries: i32,

    /// Seconds before the reaper may release a RUNNING attempt
    #[arg(long)]
    pub timeout: Option<i64>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// pending, running, finished or failed
    #[arg(short, long, default_value = "pending")]
    pub state: String,

    /// Maximum rows to print
    #[arg(short = 'n', long)]
    pub limit: Option<u32>,
}
