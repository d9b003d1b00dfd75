//! Worker pool and dispatch loop.
//!
//! The dispatcher claims each task on behalf of an idle worker before handing
//! it over, so a task id is never queued toward two workers. Back-pressure
//! comes from waiting on the idle channel: when every worker is busy the pass
//! blocks instead of pulling more rows.

use super::runner::RunnerRegistry;
use super::worker::Worker;
use crate::db::Database;
use crate::types::{Task, TaskState};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct WorkerPool {
    db: Database,
    /// One bounded handoff per worker, indexed by rank.
    senders: Vec<mpsc::Sender<Task>>,
    idle_rx: mpsc::Receiver<i64>,
    /// Idle ranks taken off the channel but not yet given work.
    spare: Vec<i64>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `num_workers` workers. They are running before any dispatch happens.
    pub fn spawn(db: Database, runners: Arc<RunnerRegistry>, num_workers: usize) -> Self {
        let (idle_tx, idle_rx) = mpsc::channel(num_workers.max(1));
        let mut senders = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for rank in 0..num_workers {
            let (tx, rx) = mpsc::channel(1);
            let worker = Worker::new(rank as i64, db.clone(), Arc::clone(&runners));
            handles.push(tokio::spawn(worker.run(rx, idle_tx.clone())));
            senders.push(tx);
        }

        info!(num_workers, "worker pool started");

        Self {
            db,
            senders,
            idle_rx,
            spare: Vec::new(),
            handles,
        }
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    async fn next_idle(&mut self) -> Result<i64> {
        if let Some(rank) = self.spare.pop() {
            return Ok(rank);
        }
        self.idle_rx
            .recv()
            .await
            .ok_or_else(|| anyhow!("all workers have exited"))
    }

    /// One dispatch pass over the currently PENDING tasks.
    ///
    /// Returns how many tasks were claimed and handed to workers.
    pub async fn dispatch_once(&mut self) -> Result<usize> {
        self.dispatch_pass(None).await
    }

    /// Dispatch pass that stops waiting for idle workers once `shutdown` is set.
    async fn dispatch_pass(
        &mut self,
        mut shutdown: Option<&mut watch::Receiver<bool>>,
    ) -> Result<usize> {
        let pending = self.db.list_tasks_by_state(TaskState::Pending, None)?;
        let mut handed_off = 0;

        for task in pending {
            let rank = match shutdown.as_deref_mut() {
                Some(rx) => tokio::select! {
                    rank = self.next_idle() => rank?,
                    _ = shutdown_requested(rx) => {
                        debug!(handed_off, "dispatch pass interrupted by shutdown");
                        break;
                    }
                },
                None => self.next_idle().await?,
            };

            let claimed = match self.db.claim_task(task.id, rank) {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    debug!(task_id = task.id, "task claimed elsewhere, skipping");
                    self.spare.push(rank);
                    continue;
                }
                Err(e) => {
                    self.spare.push(rank);
                    return Err(e);
                }
            };

            let sender = usize::try_from(rank)
                .ok()
                .and_then(|i| self.senders.get(i))
                .ok_or_else(|| anyhow!("unknown worker rank {rank}"))?;

            if sender.send(claimed).await.is_err() {
                // The claimed row stays RUNNING; only the timeout reaper recovers it.
                return Err(anyhow!(
                    "worker {rank} exited while task {} was handed to it",
                    task.id
                ));
            }
            debug!(task_id = task.id, worker_id = rank, "task dispatched");
            handed_off += 1;
        }

        Ok(handed_off)
    }

    /// Dispatch every `interval` until `shutdown` becomes true.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs_f64(), "dispatch loop started");

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.dispatch_pass(Some(&mut shutdown)).await {
                        Ok(0) => {}
                        Ok(n) => debug!(dispatched = n, "dispatch pass complete"),
                        Err(e) => error!("dispatch pass failed: {e:#}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        info!("dispatch loop shutting down");
        self.stop().await;
    }

    /// Close the handoff channels and wait for in-flight tasks to finish.
    pub async fn stop(self) {
        drop(self.senders);
        drop(self.idle_rx);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("worker task ended abnormally: {e}");
            }
        }
    }
}

/// Resolves once `rx` holds `true` or its sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
