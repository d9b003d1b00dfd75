//! Core types for the task queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a task row.
///
/// ```text
/// PENDING ──claim──> RUNNING ──success──────────────> FINISHED
///    ^                  │
///    └──failure, budget left──┘──failure, exhausted──> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker; `owner_worker_id` is set.
    Running,
    /// Completed successfully. Terminal.
    Finished,
    /// Retries exhausted. Terminal.
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Finished,
        TaskState::Failed,
    ];

    /// The value stored in the `state` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskState::Pending),
            "running" => Ok(TaskState::Running),
            "finished" => Ok(TaskState::Finished),
            "failed" => Ok(TaskState::Failed),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    /// Opaque payload; interpretation belongs to the runner.
    pub args: Option<String>,
    /// Incremented once per claim, including the first attempt.
    pub num_retries: i32,
    pub max_retries: i32,
    pub state: TaskState,
    /// Pool rank of the worker holding the claim. Diagnostic only.
    pub owner_worker_id: Option<i64>,
    /// Zero or absent means no timeout.
    pub timeout_seconds: Option<i64>,
    pub task_result: Option<String>,
    pub recurring_task_id: Option<i64>,
    /// Key used to resolve the runner.
    pub task_type: String,
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

/// Input for an ad hoc task submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub max_retries: i32,
    pub task_type: String,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
            max_retries: 0,
            task_type: task_type.into(),
            timeout_seconds: None,
        }
    }

    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, seconds: i64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Reject inputs the schema would accept but the queue cannot honor.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.task_type.trim().is_empty() {
            return Err("task_type must not be empty".to_string());
        }
        if self.max_retries < 0 {
            return Err("max_retries must be non-negative".to_string());
        }
        if self.timeout_seconds.is_some_and(|t| t < 0) {
            return Err("timeout_seconds must be non-negative".to_string());
        }
        Ok(())
    }
}

/// A schedule definition that spawns task instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringTask {
    pub id: i64,
    pub name: String,
    pub args: Option<String>,
    pub max_retries: i32,
    pub task_type: String,
    /// Five-field cron expression.
    pub cron_spec: String,
    /// Seconds; copied into each instance's `timeout_seconds`.
    pub timeout: i64,
    /// When false, no new instance is created while the latest one is RUNNING.
    pub enable_overrun: bool,
    pub created_at: i64,
}

impl RecurringTask {
    /// The fields copied into every instance this definition spawns.
    pub fn instance(&self) -> NewTask {
        NewTask {
            name: self.name.clone(),
            args: self.args.clone(),
            max_retries: self.max_retries,
            task_type: self.task_type.clone(),
            timeout_seconds: Some(self.timeout),
        }
    }

    /// True when `other` describes the same schedule.
    pub fn matches(&self, other: &NewRecurringTask) -> bool {
        self.name == other.name
            && self.args == other.args
            && self.max_retries == other.max_retries
            && self.task_type == other.task_type
            && self.cron_spec == other.cron_spec
            && self.timeout == other.timeout
            && self.enable_overrun == other.enable_overrun
    }
}

/// Input for registering a recurring definition (also the config file shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecurringTask {
    pub name: String,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub max_retries: i32,
    pub task_type: String,
    pub cron_spec: String,
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub enable_overrun: bool,
}

/// Result of a runner invocation, as seen by Resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    /// The string recorded in `task_result`.
    pub fn result_text(&self) -> &str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure(reason) => reason,
        }
    }
}

/// State a claimed attempt resolves to.
///
/// `num_retries` is the post-claim counter. A failure on the last budgeted
/// attempt is terminal; success always finishes.
pub fn resolved_state(num_retries: i32, max_retries: i32, outcome: &Outcome) -> TaskState {
    match outcome {
        Outcome::Success => TaskState::Finished,
        Outcome::Failure(_) if num_retries >= max_retries => TaskState::Failed,
        Outcome::Failure(_) => TaskState::Pending,
    }
}

/// What a Resolve write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub state: TaskState,
    /// False when the row was no longer owned by this attempt.
    pub applied: bool,
}

/// Outcome of registering a recurring definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub task: RecurringTask,
    /// False when a definition with the same name already existed.
    pub created: bool,
}

/// Per-state task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: i64,
    pub running: i64,
    pub finished: i64,
    pub failed: i64,
}

impl TaskCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.finished + self.failed
    }
}
