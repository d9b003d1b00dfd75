//! Task runners and the task-type registry.

use crate::db::Database;
use crate::types::Task;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-attempt information handed to a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    /// Pool rank of the executing worker.
    pub worker_id: i64,
    /// 1-based attempt number (the task's `num_retries` after the claim).
    pub attempt: i32,
}

/// User-supplied execution logic for one task type.
///
/// Invoked once per claimed attempt. Delivery is at-least-once: a crash
/// between claim and resolve re-runs the task, so runners must tolerate
/// repeated invocation.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, ctx: &RunContext, db: &Database, task: &Task) -> Result<()>;
}

/// Immutable mapping from task type to runner, built once at startup.
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn TaskRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a runner for `task_type`, replacing any earlier registration.
    pub fn register(mut self, task_type: impl Into<String>, runner: impl TaskRunner + 'static) -> Self {
        self.runners.insert(task_type.into(), Arc::new(runner));
        self
    }

    /// Add an already shared runner.
    pub fn register_arc(mut self, task_type: impl Into<String>, runner: Arc<dyn TaskRunner>) -> Self {
        self.runners.insert(task_type.into(), runner);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskRunner>> {
        self.runners.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.runners.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Registry with the built-in `log` and `sleep` runners.
    pub fn with_builtins() -> Self {
        Self::new().register("log", LogRunner).register("sleep", SleepRunner)
    }
}

/// Logs the task and succeeds.
pub struct LogRunner;

#[async_trait]
impl TaskRunner for LogRunner {
    async fn run(&self, ctx: &RunContext, _db: &Database, task: &Task) -> Result<()> {
        tracing::info!(
            task_id = task.id,
            worker_id = ctx.worker_id,
            attempt = ctx.attempt,
            name = %task.name,
            args = task.args.as_deref().unwrap_or(""),
            "log runner"
        );
        Ok(())
    }
}

/// Sleeps for the number of seconds given in `args`, then succeeds.
pub struct SleepRunner;

#[async_trait]
impl TaskRunner for SleepRunner {
    async fn run(&self, _ctx: &RunContext, _db: &Database, task: &Task) -> Result<()> {
        let raw = task.args.as_deref().unwrap_or("").trim();
        let secs: f64 = raw
            .parse()
            .map_err(|_| anyhow!("sleep runner expects seconds in args, got '{raw}'"))?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(anyhow!("sleep duration must be a non-negative number, got {secs}"));
        }
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        Ok(())
    }
}
