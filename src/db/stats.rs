//! Aggregate queries for status surfaces.

use super::Database;
use crate::types::{TaskCounts, TaskState};
use anyhow::Result;

impl Database {
    /// Count tasks per state.
    pub fn task_counts(&self) -> Result<TaskCounts> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT state, COUNT(*) FROM tasks GROUP BY state")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut counts = TaskCounts::default();
            for row in rows {
                let (state, count) = row?;
                match state.parse::<TaskState>() {
                    Ok(TaskState::Pending) => counts.pending = count,
                    Ok(TaskState::Running) => counts.running = count,
                    Ok(TaskState::Finished) => counts.finished = count,
                    Ok(TaskState::Failed) => counts.failed = count,
                    Err(e) => tracing::warn!("skipping unexpected state in counts: {e}"),
                }
            }
            Ok(counts)
        })
    }
}
