//! Task rows: insertion, listing, and the claim / resolve protocol.
//!
//! Every ownership change is a single conditioned `UPDATE`; the affected-row
//! count decides whether the caller won. Nothing here takes a lock wider than
//! one row's predicate, so several processes may share the database file.

use super::{Database, now_ms};
use crate::types::{NewTask, Outcome, Resolution, Task, TaskState, resolved_state};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let state: String = row.get("state")?;
    let state = state.parse::<TaskState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;

    Ok(Task {
        id: row.get("id")?,
        name: row.get("name")?,
        args: row.get("args")?,
        num_retries: row.get("num_retries")?,
        max_retries: row.get("max_retries")?,
        state,
        owner_worker_id: row.get("owner_worker_id")?,
        timeout_seconds: row.get("timeout_seconds")?,
        task_result: row.get("task_result")?,
        recurring_task_id: row.get("recurring_task_id")?,
        task_type: row.get("task_type")?,
        last_updated: row.get("last_updated")?,
        created_at: row.get("created_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, task_id: i64) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE id = ?1",
            params![task_id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

fn insert_task_internal(
    conn: &Connection,
    task: &NewTask,
    recurring_task_id: Option<i64>,
    now: i64,
) -> Result<Task> {
    conn.execute(
        "INSERT INTO tasks
         (name, args, num_retries, max_retries, state, owner_worker_id, timeout_seconds,
          task_result, recurring_task_id, task_type, last_updated, created_at)
         VALUES (?1, ?2, 0, ?3, ?4, NULL, ?5, NULL, ?6, ?7, ?8, ?8)",
        params![
            task.name,
            task.args,
            task.max_retries,
            TaskState::Pending.as_str(),
            task.timeout_seconds,
            recurring_task_id,
            task.task_type,
            now,
        ],
    )?;

    Ok(Task {
        id: conn.last_insert_rowid(),
        name: task.name.clone(),
        args: task.args.clone(),
        num_retries: 0,
        max_retries: task.max_retries,
        state: TaskState::Pending,
        owner_worker_id: None,
        timeout_seconds: task.timeout_seconds,
        task_result: None,
        recurring_task_id,
        task_type: task.task_type.clone(),
        last_updated: now,
        created_at: now,
    })
}

impl Database {
    /// Submit an ad hoc task. It starts PENDING with no attempts.
    pub fn insert_task(&self, task: &NewTask) -> Result<Task> {
        self.insert_task_at(task, None, now_ms())
    }

    /// Insert a task with explicit timestamps and an optional recurring back-reference.
    pub fn insert_task_at(
        &self,
        task: &NewTask,
        recurring_task_id: Option<i64>,
        now: i64,
    ) -> Result<Task> {
        self.with_conn(|conn| insert_task_internal(conn, task, recurring_task_id, now))
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// List tasks in the given state, oldest first.
    pub fn list_tasks_by_state(&self, state: TaskState, limit: Option<u32>) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM tasks WHERE state = ?1 ORDER BY created_at, id LIMIT ?2",
            )?;
            // SQLite treats a negative LIMIT as unbounded.
            let limit = limit.map_or(-1, i64::from);
            let tasks = stmt
                .query_map(params![state.as_str(), limit], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Take exclusive custody of a PENDING task for `worker_id`.
    ///
    /// Returns the post-claim row (RUNNING, counter incremented) when this call
    /// won, or `None` when the row was no longer PENDING. Losing is not an error.
    pub fn claim_task(&self, task_id: i64, worker_id: i64) -> Result<Option<Task>> {
        let now = now_ms();

        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE tasks
                 SET state = ?1, owner_worker_id = ?2, num_retries = num_retries + 1, last_updated = ?3
                 WHERE id = ?4 AND state = ?5",
                params![
                    TaskState::Running.as_str(),
                    worker_id,
                    now,
                    task_id,
                    TaskState::Pending.as_str(),
                ],
            )?;

            if affected == 0 {
                return Ok(None);
            }

            get_task_internal(conn, task_id)
        })
    }

    /// Record the outcome of a claimed attempt.
    ///
    /// `claimed` must be the row returned by [`Database::claim_task`]. The write
    /// only applies while the row is still RUNNING under the same owner and the
    /// same attempt number; otherwise `applied` is false and nothing changes.
    pub fn resolve_task(
        &self,
        claimed: &Task,
        worker_id: i64,
        outcome: &Outcome,
    ) -> Result<Resolution> {
        let now = now_ms();
        let state = resolved_state(claimed.num_retries, claimed.max_retries, outcome);

        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE tasks
                 SET state = ?1, owner_worker_id = NULL, task_result = ?2, last_updated = ?3
                 WHERE id = ?4 AND state = ?5 AND owner_worker_id = ?6 AND num_retries = ?7",
                params![
                    state.as_str(),
                    outcome.result_text(),
                    now,
                    claimed.id,
                    TaskState::Running.as_str(),
                    worker_id,
                    claimed.num_retries,
                ],
            )?;

            Ok(Resolution {
                state,
                applied: affected > 0,
            })
        })
    }

    /// Most recent instance spawned by a recurring definition.
    pub fn latest_task_for_recurring(&self, recurring_task_id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            let task = conn
                .query_row(
                    "SELECT * FROM tasks WHERE recurring_task_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    params![recurring_task_id],
                    parse_task_row,
                )
                .optional()?;
            Ok(task)
        })
    }

    /// Release RUNNING tasks whose claim has outlived their timeout.
    ///
    /// Tasks with budget left go back to PENDING; the rest become FAILED.
    /// Returns the number of rows changed.
    pub fn requeue_timed_out(&self, now: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE tasks
                 SET state = CASE WHEN num_retries >= max_retries THEN ?1 ELSE ?2 END,
                     owner_worker_id = NULL,
                     task_result = 'timed out after ' || timeout_seconds || 's',
                     last_updated = ?3
                 WHERE state = ?4
                   AND timeout_seconds > 0
                   AND last_updated + timeout_seconds * 1000 < ?3",
                params![
                    TaskState::Failed.as_str(),
                    TaskState::Pending.as_str(),
                    now,
                    TaskState::Running.as_str(),
                ],
            )?;
            Ok(affected)
        })
    }
}
