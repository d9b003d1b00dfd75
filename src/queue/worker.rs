//! A worker executes one claimed task at a time and records its outcome.

use super::runner::{RunContext, RunnerRegistry, TaskRunner};
use crate::db::Database;
use crate::types::{Outcome, Resolution, Task, TaskState};
use anyhow::Result;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub struct Worker {
    id: i64,
    db: Database,
    runners: Arc<RunnerRegistry>,
}

impl Worker {
    pub fn new(id: i64, db: Database, runners: Arc<RunnerRegistry>) -> Self {
        Self { id, db, runners }
    }

    /// Worker loop: announce readiness, take the next claimed task, run it.
    ///
    /// Exits when either channel closes (the pool was dropped).
    pub async fn run(self, mut tasks: mpsc::Receiver<Task>, idle: mpsc::Sender<i64>) {
        let span = info_span!("worker", worker_id = self.id);
        async move {
            debug!("worker started");
            loop {
                if idle.send(self.id).await.is_err() {
                    break;
                }
                let Some(task) = tasks.recv().await else {
                    break;
                };
                if let Err(e) = self.execute(task).await {
                    error!("failed to record task outcome: {e:#}");
                }
            }
            debug!("worker stopped");
        }
        .instrument(span)
        .await
    }

    /// Claim a PENDING task for this worker and execute it.
    ///
    /// Returns `None` without running anything when another actor got there first.
    pub async fn process(&self, task_id: i64) -> Result<Option<Resolution>> {
        match self.db.claim_task(task_id, self.id)? {
            Some(claimed) => self.execute(claimed).await.map(Some),
            None => {
                debug!(task_id, worker_id = self.id, "claim lost, skipping");
                Ok(None)
            }
        }
    }

    /// Drive an already-claimed task to its resolved state.
    pub async fn execute(&self, task: Task) -> Result<Resolution> {
        debug!(task_id = task.id, name = %task.name, attempt = task.num_retries, "starting task");

        let outcome = match self.runners.get(&task.task_type) {
            Some(runner) => self.invoke(runner, &task).await,
            None => {
                warn!(
                    task_id = task.id,
                    task_type = %task.task_type,
                    "no runner registered for task type"
                );
                Outcome::Failure(format!(
                    "runner not found for task type '{}'",
                    task.task_type
                ))
            }
        };

        if let Outcome::Failure(reason) = &outcome {
            warn!(task_id = task.id, name = %task.name, attempt = task.num_retries, "task attempt failed: {reason}");
        }

        let resolution = self.db.resolve_task(&task, self.id, &outcome)?;

        if !resolution.applied {
            warn!(
                task_id = task.id,
                "task no longer owned by this attempt; outcome discarded"
            );
        } else if resolution.state == TaskState::Failed {
            warn!(
                task_id = task.id,
                name = %task.name,
                attempts = task.num_retries,
                "task exhausted its retries"
            );
        } else {
            info!(task_id = task.id, name = %task.name, state = %resolution.state, "task resolved");
        }

        Ok(resolution)
    }

    /// Run the runner on its own tokio task so a panic fails the attempt
    /// instead of taking the worker down.
    async fn invoke(&self, runner: Arc<dyn TaskRunner>, task: &Task) -> Outcome {
        let ctx = RunContext {
            worker_id: self.id,
            attempt: task.num_retries,
        };
        let db = self.db.clone();
        let task = task.clone();

        let handle = tokio::spawn(async move { runner.run(&ctx, &db, &task).await });

        match handle.await {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(e)) => Outcome::Failure(format!("{e:#}")),
            Err(e) if e.is_panic() => Outcome::Failure(format!(
                "runner panicked: {}",
                panic_message(e.into_panic())
            )),
            Err(e) => Outcome::Failure(format!("runner aborted: {e}")),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
