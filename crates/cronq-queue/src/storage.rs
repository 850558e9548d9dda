use crate::{
    error::Result,
    types::{JobFilter, JobStatus},
};

/// A job row in its storage wire form: `config` is a JSON-encoded string.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    /// `None` until the backend assigns one.
    pub id: Option<String>,
    pub name: String,
    pub handler_class: String,
    pub extension_name: Option<String>,
    pub priority: i32,
    pub status: JobStatus,
    pub recurrence_spec: Option<String>,
    pub schedule_time: Option<i64>,
    pub config: Option<String>,
    pub queue: Option<String>,
    pub date_executed: Option<i64>,
    pub next_run: Option<i64>,
}

/// Outcome of a successful run, written back by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUpdate {
    pub id: String,
    pub status: JobStatus,
    pub date_executed: i64,
    /// `None` makes the job terminal.
    pub next_run: Option<i64>,
}

/// Persistence backend for the queue.
///
/// Due selection works on the precomputed `next_run` column: a row is due when
/// its status is `pending`, or `executed` for recurring rows, and
/// `next_run <= now`. Rows come back ordered by priority, highest first.
pub trait QueueStorage: Send + Sync {
    fn has_job(&self, id: &str) -> Result<bool>;

    /// Look a job up by id, falling back to its name.
    fn get_job(&self, id: &str) -> Result<Option<JobRow>>;

    fn get_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRow>>;

    fn get_jobs_due(&self, now: i64) -> Result<Vec<JobRow>>;

    /// Highest-priority due row, if any.
    fn get_next(&self, now: i64) -> Result<Option<JobRow>>;

    /// Insert a row, assigning an id when it has none. Returns the id.
    fn add_job(&self, row: JobRow) -> Result<String>;

    /// Returns false when no row matched.
    fn delete_job(&self, id: &str) -> Result<bool>;

    fn delete_jobs(&self, filter: &JobFilter) -> Result<bool>;

    fn update_execution_status(&self, update: &ExecutionUpdate) -> Result<bool>;

    /// Store a JSON-encoded config for the job `get_job(id)` would return.
    fn save_job_config(&self, id: &str, config: &str) -> Result<bool>;

    /// Change the status of the job `get_job(id)` would return.
    fn set_status(&self, id: &str, status: JobStatus) -> Result<bool>;
}
