//! Recurring task definitions.

use super::{Database, now_ms};
use crate::types::{NewRecurringTask, RecurringTask, Registration};
use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::warn;

fn parse_recurring_row(row: &Row) -> rusqlite::Result<RecurringTask> {
    Ok(RecurringTask {
        id: row.get("id")?,
        name: row.get("name")?,
        args: row.get("args")?,
        max_retries: row.get("max_retries")?,
        task_type: row.get("task_type")?,
        cron_spec: row.get("cron_spec")?,
        timeout: row.get("timeout")?,
        enable_overrun: row.get("enable_overrun")?,
        created_at: row.get("created_at")?,
    })
}

fn get_by_name_internal(conn: &Connection, name: &str) -> Result<Option<RecurringTask>> {
    let task = conn
        .query_row(
            "SELECT * FROM recurring_tasks WHERE name = ?1",
            params![name],
            parse_recurring_row,
        )
        .optional()?;
    Ok(task)
}

impl Database {
    /// Register a recurring definition, keyed by name.
    ///
    /// Re-registering an existing name returns the stored row untouched, so
    /// restarts do not accumulate duplicate schedules.
    pub fn register_recurring_task(&self, def: &NewRecurringTask) -> Result<Registration> {
        crate::cron::parse(&def.cron_spec)
            .with_context(|| format!("recurring task '{}'", def.name))?;

        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(existing) = get_by_name_internal(&tx, &def.name)? {
                if !existing.matches(def) {
                    warn!(
                        recurring_task_id = existing.id,
                        name = %def.name,
                        "recurring task already registered with different settings; keeping stored definition"
                    );
                }
                return Ok(Registration {
                    task: existing,
                    created: false,
                });
            }

            tx.execute(
                "INSERT INTO recurring_tasks
                 (name, args, max_retries, task_type, cron_spec, timeout, enable_overrun, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    def.name,
                    def.args,
                    def.max_retries,
                    def.task_type,
                    def.cron_spec,
                    def.timeout,
                    def.enable_overrun,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            Ok(Registration {
                task: RecurringTask {
                    id,
                    name: def.name.clone(),
                    args: def.args.clone(),
                    max_retries: def.max_retries,
                    task_type: def.task_type.clone(),
                    cron_spec: def.cron_spec.clone(),
                    timeout: def.timeout,
                    enable_overrun: def.enable_overrun,
                    created_at: now,
                },
                created: true,
            })
        })
    }

    /// Get a recurring definition by ID.
    pub fn get_recurring_task(&self, id: i64) -> Result<Option<RecurringTask>> {
        self.with_conn(|conn| {
            let task = conn
                .query_row(
                    "SELECT * FROM recurring_tasks WHERE id = ?1",
                    params![id],
                    parse_recurring_row,
                )
                .optional()?;
            Ok(task)
        })
    }

    /// All recurring definitions in registration order.
    pub fn list_recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT * FROM recurring_tasks ORDER BY id")?;
            let tasks = stmt
                .query_map([], parse_recurring_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }
}
