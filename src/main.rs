//! taskrow
//!
//! Runs the worker pool, recurring scheduler and HTTP submission surface,
//! or performs one-shot queue operations from the command line.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::Path;
use taskrow::TaskRow;
use taskrow::cli::{Cli, Command, ListArgs, SubmitArgs};
use taskrow::config::Config;
use taskrow::db::Database;
use taskrow::logging::{self, LogLevel, LogOutput};
use taskrow::queue::RunnerRegistry;
use taskrow::types::{NewTask, TaskState};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref().map(Path::new))?;

    // Override paths from CLI arguments
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }
    if cli.verbose {
        config.server.log_level = LogLevel::Debug;
    }

    let output: LogOutput = match cli.log.parse() {
        Ok(output) => output,
        Err(never) => match never {},
    };
    logging::init(config.server.log_level, &output)?;

    match cli.command {
        Some(Command::Submit(args)) => run_submit(&config, args),
        Some(Command::List(args)) => run_list(&config, args),
        Some(Command::Status) => run_status(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

async fn run_server(config: Config) -> Result<()> {
    info!("Starting taskrow v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {:?}", config.server.db_path);
    info!("Workers: {}", config.queue.num_workers);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => warn!("failed to listen for ctrl-c: {e}"),
        }
        let _ = shutdown_tx.send(true);
    });

    TaskRow::new(config)
        .runners(RunnerRegistry::with_builtins())
        .start(shutdown_rx)
        .await
}

fn open_db(config: &Config) -> Result<Database> {
    config.ensure_db_dir()?;
    Database::open(&config.server.db_path)
}

fn run_submit(config: &Config, args: SubmitArgs) -> Result<()> {
    let mut new_task = NewTask::new(args.name, args.task_type).with_max_retries(args.max_retries);
    if let Some(payload) = args.args {
        new_task = new_task.with_args(payload);
    }
    if let Some(timeout) = args.timeout {
        new_task = new_task.with_timeout(timeout);
    }
    if let Err(reason) = new_task.validate() {
        bail!("invalid task: {reason}");
    }

    let db = open_db(config)?;
    let task = db.insert_task(&new_task)?;
    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}

fn run_list(config: &Config, args: ListArgs) -> Result<()> {
    let state: TaskState = args.state.parse().map_err(anyhow::Error::msg)?;
    let db = open_db(config)?;
    let tasks = db.list_tasks_by_state(state, args.limit)?;

    if tasks.is_empty() {
        eprintln!("No {state} tasks");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{:>6}  {:<24}  {:<12}  attempts {}/{}  {}",
            task.id,
            task.name,
            task.task_type,
            task.num_retries,
            task.max_retries,
            task.task_result.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    let db = open_db(config)?;
    let counts = db.task_counts()?;
    println!("pending:  {}", counts.pending);
    println!("running:  {}", counts.running);
    println!("finished: {}", counts.finished);
    println!("failed:   {}", counts.failed);
    println!("total:    {}", counts.total());
    Ok(())
}
