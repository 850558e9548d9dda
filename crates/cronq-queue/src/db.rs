use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{
    params_from_iter,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
    Connection, OptionalExtension, Row,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{QueueError, Result},
    storage::{ExecutionUpdate, JobRow, QueueStorage},
    types::{FilterValue, JobFilter, JobStatus},
};

/// Initialise the queue schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `(status, next_run)`
/// so the due query stays cheap as the table grows.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            name             TEXT    NOT NULL,
            handler_class    TEXT    NOT NULL,
            extension_name   TEXT,
            priority         INTEGER NOT NULL DEFAULT 0,
            status           TEXT    NOT NULL DEFAULT 'pending',
            recurrence_spec  TEXT,               -- cron expression or duration interval
            schedule_time    INTEGER,            -- epoch seconds, 0 = unset
            config           TEXT,               -- JSON-encoded handler config
            queue            TEXT,
            date_executed    INTEGER,            -- epoch seconds of last successful run
            next_run         INTEGER,            -- epoch seconds or NULL when terminal
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        -- Due polling: WHERE status IN (...) AND next_run <= ?  ORDER BY priority
        CREATE INDEX IF NOT EXISTS idx_jobs_status_next_run ON jobs (status, next_run);
        CREATE INDEX IF NOT EXISTS idx_jobs_name ON jobs (name);
        ",
    )?;
    Ok(())
}

const COLUMNS: &str = "id, name, handler_class, extension_name, priority, status,
    recurrence_spec, schedule_time, config, queue, date_executed, next_run";

// Pending rows, plus executed recurring rows waiting for their next cycle.
const DUE_CLAUSE: &str = "next_run IS NOT NULL AND next_run <= ?1
    AND (status = 'pending' OR (status = 'executed' AND recurrence_spec IS NOT NULL))";

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// SQLite-backed [`QueueStorage`].
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Storage("connection mutex poisoned".to_string()))
    }

    fn query_rows(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<JobRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        handler_class: row.get(2)?,
        extension_name: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        recurrence_spec: row.get(6)?,
        schedule_time: row.get(7)?,
        config: row.get(8)?,
        queue: row.get(9)?,
        date_executed: row.get(10)?,
        next_run: row.get(11)?,
    })
}

/// Build the `WHERE` clause and its positional values for `filter`.
fn filter_clause(filter: &JobFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    for (column, rule) in [
        ("recurrence_spec", &filter.recurrence_spec),
        ("extension_name", &filter.extension_name),
    ] {
        match rule {
            Some(FilterValue::Any) => clauses.push(format!("{column} IS NOT NULL")),
            Some(FilterValue::Missing) => clauses.push(format!("{column} IS NULL")),
            Some(FilterValue::Exact(value)) => {
                values.push(value.clone());
                clauses.push(format!("{column} = ?{}", values.len()));
            }
            None => {}
        }
    }

    if let Some(status) = filter.status {
        values.push(status.to_string());
        clauses.push(format!("status = ?{}", values.len()));
    }

    match filter.scheduled {
        Some(true) => clauses.push("schedule_time IS NOT NULL".to_string()),
        Some(false) => clauses.push("schedule_time IS NULL".to_string()),
        None => {}
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, values)
}

impl QueueStorage for SqliteStorage {
    fn has_job(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn get_job(&self, id: &str) -> Result<Option<JobRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM jobs WHERE id = ?1 OR name = ?1
                     ORDER BY (id = ?1) DESC, created_at, rowid LIMIT 1"
                ),
                [id],
                read_row,
            )
            .optional()?;
        Ok(row)
    }

    fn get_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRow>> {
        let (clause, values) = filter_clause(filter);
        let sql = format!("SELECT {COLUMNS} FROM jobs{clause} ORDER BY priority DESC, created_at");
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn get_jobs_due(&self, now: i64) -> Result<Vec<JobRow>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE {DUE_CLAUSE}
             ORDER BY priority DESC, next_run, created_at"
        );
        let rows = self.query_rows(&sql, &[&now])?;
        debug!(count = rows.len(), now, "due jobs selected");
        Ok(rows)
    }

    fn get_next(&self, now: i64) -> Result<Option<JobRow>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE {DUE_CLAUSE}
             ORDER BY priority DESC, next_run, created_at LIMIT 1"
        );
        Ok(self.query_rows(&sql, &[&now])?.into_iter().next())
    }

    fn add_job(&self, row: JobRow) -> Result<String> {
        let conn = self.conn()?;
        let id = row.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now_str = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO jobs
             (id, name, handler_class, extension_name, priority, status, recurrence_spec,
              schedule_time, config, queue, date_executed, next_run, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?13)",
            rusqlite::params![
                id,
                row.name,
                row.handler_class,
                row.extension_name,
                row.priority,
                row.status,
                row.recurrence_spec,
                row.schedule_time,
                row.config,
                row.queue,
                row.date_executed,
                row.next_run,
                now_str
            ],
        )?;

        info!(job_id = %id, name = %row.name, status = %row.status, "job stored");
        Ok(id)
    }

    fn delete_job(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        if n > 0 {
            info!(job_id = %id, "job deleted");
        }
        Ok(n > 0)
    }

    fn delete_jobs(&self, filter: &JobFilter) -> Result<bool> {
        let (clause, values) = filter_clause(filter);
        let conn = self.conn()?;
        let n = conn.execute(
            &format!("DELETE FROM jobs{clause}"),
            params_from_iter(values.iter()),
        )?;
        info!(count = n, "jobs deleted");
        Ok(true)
    }

    fn update_execution_status(&self, update: &ExecutionUpdate) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE jobs SET status = ?1, date_executed = ?2, next_run = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![
                update.status,
                update.date_executed,
                update.next_run,
                Utc::now().to_rfc3339(),
                update.id
            ],
        )?;
        Ok(n > 0)
    }

    fn save_job_config(&self, id: &str, config: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE jobs SET config = ?1, updated_at = ?2 WHERE rowid = (
                 SELECT rowid FROM jobs WHERE id = ?3 OR name = ?3
                 ORDER BY (id = ?3) DESC, created_at, rowid LIMIT 1)",
            rusqlite::params![config, Utc::now().to_rfc3339(), id],
        )?;
        Ok(n > 0)
    }

    fn set_status(&self, id: &str, status: JobStatus) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE rowid = (
                 SELECT rowid FROM jobs WHERE id = ?3 OR name = ?3
                 ORDER BY (id = ?3) DESC, created_at, rowid LIMIT 1)",
            rusqlite::params![status, Utc::now().to_rfc3339(), id],
        )?;
        Ok(n > 0)
    }
}
