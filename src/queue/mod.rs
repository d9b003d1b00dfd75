//! Execution side of the queue: runners, workers, and the dispatching pool.

pub mod pool;
pub mod runner;
pub mod worker;

pub use pool::WorkerPool;
pub use runner::{LogRunner, RunContext, RunnerRegistry, SleepRunner, TaskRunner};
pub use worker::Worker;
