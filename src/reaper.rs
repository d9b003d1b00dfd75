//! Timeout reaper: releases RUNNING tasks whose claim outlived `timeout_seconds`.
//!
//! Off by default. A reaped attempt counts against the retry budget, and the
//! stale worker's eventual resolution is discarded by the attempt fence.

use crate::db::{Database, now_ms};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Reaper {
    db: Database,
    interval: Duration,
}

impl Reaper {
    pub fn new(db: Database, interval: Duration) -> Self {
        Self { db, interval }
    }

    /// One sweep at `now` (milliseconds). Returns the number of tasks released.
    pub fn reap_once(&self, now: i64) -> Result<usize> {
        let released = self.db.requeue_timed_out(now)?;
        if released > 0 {
            warn!(released, "released timed out tasks");
        }
        Ok(released)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs_f64(), "timeout reaper started");

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reap_once(now_ms()) {
                        error!("timeout sweep failed: {e:#}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("timeout reaper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
