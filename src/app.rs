//! Embeddable entry point.
//!
//! ```no_run
//! # use taskrow::{TaskRow, config::Config, queue::LogRunner};
//! # async fn demo() -> anyhow::Result<()> {
//! let (_tx, shutdown) = tokio::sync::watch::channel(false);
//! TaskRow::new(Config::default())
//!     .runner("log", LogRunner)
//!     .start(shutdown)
//!     .await
//! # }
//! ```

use crate::config::Config;
use crate::cron;
use crate::db::Database;
use crate::http;
use crate::queue::{RunnerRegistry, TaskRunner, WorkerPool};
use crate::reaper::Reaper;
use crate::scheduler::RecurringScheduler;
use crate::types::NewRecurringTask;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Builder for a running queue: store, workers, scheduler and optional surfaces.
pub struct TaskRow {
    config: Config,
    runners: RunnerRegistry,
    recurring: Vec<NewRecurringTask>,
    routes: Option<Router>,
}

impl TaskRow {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runners: RunnerRegistry::new(),
            recurring: Vec::new(),
            routes: None,
        }
    }

    /// Register the runner for `task_type`. A later registration replaces an earlier one.
    pub fn runner(mut self, task_type: impl Into<String>, runner: impl TaskRunner + 'static) -> Self {
        self.runners = self.runners.register(task_type, runner);
        self
    }

    /// Replace the whole runner table.
    pub fn runners(mut self, runners: RunnerRegistry) -> Self {
        self.runners = runners;
        self
    }

    /// Register a recurring definition in addition to those in the config file.
    pub fn recurring(mut self, def: NewRecurringTask) -> Self {
        self.recurring.push(def);
        self
    }

    /// Extra HTTP routes, merged into the submission surface.
    pub fn routes(mut self, router: Router) -> Self {
        self.routes = Some(match self.routes.take() {
            Some(existing) => existing.merge(router),
            None => router,
        });
        self
    }

    /// Open the store and register the recurring definitions.
    ///
    /// Fails when the database cannot be opened or the schema cannot be
    /// applied. A definition whose cron spec does not parse is logged and
    /// skipped; the others are still registered.
    pub fn prepare(&self) -> Result<Database> {
        self.config.validate()?;
        self.config.ensure_db_dir()?;

        let db = Database::open(&self.config.server.db_path).with_context(|| {
            format!(
                "failed to open database {}",
                self.config.server.db_path.display()
            )
        })?;
        info!(path = %self.config.server.db_path.display(), "database ready");

        for def in self.config.recurring_tasks.iter().chain(&self.recurring) {
            if let Err(e) = cron::parse(&def.cron_spec) {
                error!(name = %def.name, "skipping recurring task: {e}");
                continue;
            }
            if !self.runners.contains(&def.task_type) {
                warn!(
                    name = %def.name,
                    task_type = %def.task_type,
                    "no runner registered for recurring task type; its instances will fail"
                );
            }

            let registration = db
                .register_recurring_task(def)
                .with_context(|| format!("failed to register recurring task '{}'", def.name))?;
            if registration.created {
                info!(
                    recurring_task_id = registration.task.id,
                    name = %def.name,
                    cron_spec = %def.cron_spec,
                    "registered recurring task"
                );
            }
        }

        Ok(db)
    }

    /// Run until `shutdown` becomes true, then wait for in-flight work.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let db = self.prepare()?;
        let config = self.config;

        let task_types = self.runners.task_types().join(", ");
        info!(task_types = %task_types, "runners registered");

        let pool = WorkerPool::spawn(db.clone(), Arc::new(self.runners), config.queue.num_workers);
        let mut handles: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        handles.push((
            "dispatcher",
            tokio::spawn(pool.run(config.queue.poll_interval(), shutdown.clone())),
        ));

        let scheduler = RecurringScheduler::new(db.clone(), config.scheduler.interval());
        handles.push(("scheduler", tokio::spawn(scheduler.run(shutdown.clone()))));

        if config.reaper.enabled {
            let reaper = Reaper::new(db.clone(), config.reaper.interval());
            handles.push(("reaper", tokio::spawn(reaper.run(shutdown.clone()))));
        }

        if config.http.enabled {
            let router = http::build_router(db.clone(), self.routes);
            let port = config.http.port;
            let rx = shutdown.clone();
            handles.push((
                "http",
                tokio::spawn(async move {
                    if let Err(e) = http::serve(router, port, rx).await {
                        error!("HTTP server failed: {e:#}");
                    }
                }),
            ));
        } else if self.routes.is_some() {
            warn!("extra routes registered but http.enabled is false");
        }

        for (name, handle) in handles {
            if let Err(e) = handle.await {
                error!(component = name, "component ended abnormally: {e}");
            }
        }

        info!("shutdown complete");
        Ok(())
    }
}
