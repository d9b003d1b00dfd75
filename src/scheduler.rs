//! Recurring task scheduler.
//!
//! Each cycle looks at every definition's most recent instance and decides
//! whether a new one is due:
//!
//! 1. No instance yet: treat the last run as FINISHED at the Unix epoch.
//! 2. Overrun disabled and the last instance is RUNNING: skip.
//! 3. Next cron occurrence strictly after the last instance's `created_at`
//!    is before now: due.
//! 4. Due: insert a PENDING instance stamped with the evaluation time.
//!
//! A definition only advances by inserting a row, so re-evaluating at the
//! same instant after a creation is a no-op.

use crate::cron;
use crate::db::Database;
use crate::types::{RecurringTask, Task, TaskState};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What one evaluation of a definition decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// A new PENDING instance was inserted.
    Created(Task),
    /// Overrun is disabled and the previous instance is still RUNNING.
    SkippedOverrun { running_task_id: i64 },
    /// The next occurrence has not arrived yet (`None`: the schedule never fires again).
    NotDue { next: Option<DateTime<Utc>> },
    /// The stored cron spec does not parse.
    InvalidCron(String),
}

pub struct RecurringScheduler {
    db: Database,
    interval: Duration,
}

impl RecurringScheduler {
    pub fn new(db: Database, interval: Duration) -> Self {
        Self { db, interval }
    }

    /// Evaluate a single definition at `now`.
    pub fn evaluate(&self, def: &RecurringTask, now: DateTime<Utc>) -> Result<Evaluation> {
        let last = self.db.latest_task_for_recurring(def.id)?;

        if !def.enable_overrun {
            if let Some(running) = last.as_ref().filter(|t| t.state == TaskState::Running) {
                return Ok(Evaluation::SkippedOverrun {
                    running_task_id: running.id,
                });
            }
        }

        let schedule = match cron::parse(&def.cron_spec) {
            Ok(schedule) => schedule,
            Err(e) => return Ok(Evaluation::InvalidCron(e.to_string())),
        };

        let last_created = last
            .as_ref()
            .and_then(|t| DateTime::from_timestamp_millis(t.created_at))
            .unwrap_or(DateTime::UNIX_EPOCH);

        match cron::next_after(&schedule, last_created) {
            Some(next) if next < now => {
                let task =
                    self.db
                        .insert_task_at(&def.instance(), Some(def.id), now.timestamp_millis())?;
                Ok(Evaluation::Created(task))
            }
            next => Ok(Evaluation::NotDue { next }),
        }
    }

    /// Evaluate every registered definition. Returns the number of instances created.
    ///
    /// A failure on one definition is logged and does not stop the others.
    pub fn evaluate_all(&self, now: DateTime<Utc>) -> Result<usize> {
        let definitions = self.db.list_recurring_tasks()?;
        let mut created = 0;

        for def in &definitions {
            match self.evaluate(def, now) {
                Ok(Evaluation::Created(task)) => {
                    info!(
                        recurring_task_id = def.id,
                        task_id = task.id,
                        name = %def.name,
                        "created recurring task instance"
                    );
                    created += 1;
                }
                Ok(Evaluation::SkippedOverrun { running_task_id }) => {
                    warn!(
                        recurring_task_id = def.id,
                        running_task_id,
                        name = %def.name,
                        "previous instance still running, skipping"
                    );
                }
                Ok(Evaluation::NotDue { next }) => {
                    debug!(recurring_task_id = def.id, ?next, "recurring task not due");
                }
                Ok(Evaluation::InvalidCron(reason)) => {
                    error!(
                        recurring_task_id = def.id,
                        cron_spec = %def.cron_spec,
                        "skipping recurring task with invalid cron spec: {reason}"
                    );
                }
                Err(e) => {
                    error!(recurring_task_id = def.id, "failed to evaluate recurring task: {e:#}");
                }
            }
        }

        Ok(created)
    }

    /// Evaluate every `interval` until `shutdown` becomes true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            "recurring scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.evaluate_all(Utc::now()) {
                        error!("failed to load recurring tasks: {e:#}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("recurring scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
