//! taskrow: a database-backed task queue.
//!
//! Tasks live as rows in SQLite. Workers take ownership through a conditioned
//! update, so a task is executed by at most one worker per attempt. Failed
//! attempts are retried up to a per-task budget, and recurring definitions
//! spawn new instances on a cron schedule.

pub mod app;
pub mod cli;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod queue;
pub mod reaper;
pub mod scheduler;
pub mod types;

pub use app::TaskRow;
pub use db::Database;
pub use queue::{RunContext, RunnerRegistry, TaskRunner};
pub use types::{NewRecurringTask, NewTask, Task, TaskState};
