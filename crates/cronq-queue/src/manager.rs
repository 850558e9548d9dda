use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    factory::JobFactory,
    job::{Job, JobFailure, ProgressCallback, SUSPENDED_MESSAGE},
    schedule::{initial_next_run, next_run_after},
    storage::{ExecutionUpdate, JobRow, QueueStorage},
    types::{FilterValue, JobFilter, JobKind, JobRecord, JobStatus},
};

/// Source of "now" for due checks and execution timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Options for [`QueueManager::add_job`].
#[derive(Debug, Clone, Default)]
pub struct AddJobOptions {
    /// Overrides the job's own extension name.
    pub extension: Option<String>,
    /// Persist as `Suspended` instead of `Pending`.
    pub disabled: bool,
    /// Recurrence spec for jobs that are not recurring themselves.
    pub recurrence: Option<String>,
    /// Schedule time for jobs that are not scheduled themselves.
    pub schedule_time: Option<i64>,
    /// Stored when the handler is not config-aware.
    pub config: Option<Value>,
}

impl AddJobOptions {
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn recurrence(mut self, spec: impl Into<String>) -> Self {
        self.recurrence = Some(spec.into());
        self
    }

    pub fn schedule_time(mut self, at: i64) -> Self {
        self.schedule_time = Some(at);
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// What [`QueueManager::run`] should execute.
pub enum JobTarget {
    /// A persisted job id (or name, or registered handler class).
    Id(String),
    Job(Job),
}

impl From<&str> for JobTarget {
    fn from(id: &str) -> Self {
        JobTarget::Id(id.to_string())
    }
}

impl From<String> for JobTarget {
    fn from(id: String) -> Self {
        JobTarget::Id(id)
    }
}

impl From<Job> for JobTarget {
    fn from(job: Job) -> Self {
        JobTarget::Job(job)
    }
}

/// Orchestrates job creation, persistence and execution.
///
/// Every public method returns a definite value: storage errors are logged and
/// turned into `false`, `None` or an empty list, and handler failures end up
/// in the returned job's error list.
pub struct QueueManager {
    storage: Arc<dyn QueueStorage>,
    factory: Arc<dyn JobFactory>,
    tz: Tz,
    clock: Clock,
}

impl QueueManager {
    pub fn new(storage: Arc<dyn QueueStorage>, factory: Arc<dyn JobFactory>) -> Self {
        Self {
            storage,
            factory,
            tz: Tz::UTC,
            clock: Arc::new(Utc::now),
        }
    }

    /// Zone cron expressions are evaluated in.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> &Arc<dyn QueueStorage> {
        &self.storage
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn has(&self, id: &str) -> bool {
        checked("has_job", self.storage.has_job(id)).unwrap_or(false)
    }

    /// Resolve `identifier` as a handler class through the factory, falling
    /// back to a persisted job with that id or name.
    pub fn create(
        &self,
        identifier: &str,
        extension: Option<&str>,
        params: Option<Map<String, Value>>,
    ) -> Option<Job> {
        let params = params.unwrap_or_default();
        if let Some(job) = self.factory.create_job(identifier, extension, None, params) {
            return Some(job);
        }

        let Some(record) = self.get_job(identifier) else {
            debug!(%identifier, "no handler or stored job for identifier");
            return None;
        };
        self.create_job_from_record(&record)
    }

    /// Hydrate a live job from a stored record. Only the record's typed
    /// fields are applied; the handler comes from the factory.
    pub fn create_job_from_record(&self, record: &JobRecord) -> Option<Job> {
        let Some(mut job) = self.factory.create_job(
            &record.handler_class,
            record.extension_name.as_deref(),
            Some(&record.name),
            Map::new(),
        ) else {
            warn!(
                job_id = %record.id,
                handler_class = %record.handler_class,
                "cannot hydrate job: handler not registered"
            );
            return None;
        };

        job.assign_id(record.id.clone());
        job.set_priority(record.priority);
        job.set_status(record.status);
        job.set_date_executed(record.date_executed);
        job.set_queue(record.queue.clone());
        job.set_kind(record.kind());
        if let Some(config) = &record.config {
            if !job.apply_config(config.clone()) {
                debug!(job_id = %record.id, "stored config ignored: handler is not config-aware");
            }
        }
        Some(job)
    }

    /// Persist `job`. On success the job carries its storage id and its new
    /// status (`Pending`, or `Suspended` when disabled).
    pub fn add_job(&self, job: &mut Job, options: AddJobOptions) -> bool {
        let recurrence = job
            .kind()
            .recurrence_spec()
            .map(String::from)
            .or(options.recurrence);
        let schedule_time = job.kind().schedule_time().or(options.schedule_time);
        let kind = match (recurrence, schedule_time) {
            (Some(_), Some(_)) => {
                warn!(name = %job.name(), "job cannot be both recurring and scheduled");
                return false;
            }
            (Some(spec), None) => JobKind::Recurring { spec },
            (None, Some(at)) => JobKind::Scheduled { at },
            (None, None) => JobKind::Immediate,
        };

        let next_run = match initial_next_run(&kind, self.now(), self.tz) {
            Ok(next) => next,
            Err(e) => {
                error!(name = %job.name(), "job not added: {e}");
                return false;
            }
        };

        let status = if options.disabled {
            JobStatus::Suspended
        } else {
            JobStatus::Pending
        };
        let extension = options
            .extension
            .or_else(|| job.extension().map(String::from));
        let config = match job.config().or(options.config) {
            Some(value) => match serde_json::to_string(&value) {
                Ok(json) => Some(json),
                Err(e) => {
                    error!(name = %job.name(), "job config not serializable: {e}");
                    return false;
                }
            },
            None => None,
        };

        let row = JobRow {
            id: job.id().map(String::from),
            name: job.name().to_string(),
            handler_class: job.handler_class().to_string(),
            extension_name: extension.clone(),
            priority: job.priority(),
            status,
            recurrence_spec: kind.recurrence_spec().map(String::from),
            schedule_time: kind.schedule_time(),
            config,
            queue: job.queue().map(String::from),
            date_executed: job.date_executed(),
            next_run,
        };

        let Some(id) = checked("add_job", self.storage.add_job(row)) else {
            return false;
        };
        job.assign_id(id);
        job.set_status(status);
        job.set_kind(kind);
        job.set_extension(extension);
        info!(job_id = ?job.id(), name = %job.name(), %status, "job added");
        true
    }

    pub fn get_job(&self, id: &str) -> Option<JobRecord> {
        checked("get_job", self.storage.get_job(id))
            .flatten()
            .and_then(to_record)
    }

    pub fn get_jobs(&self, filter: &JobFilter) -> Vec<JobRecord> {
        records(checked("get_jobs", self.storage.get_jobs(filter)))
    }

    /// Records whose precomputed next run has passed, highest priority first.
    pub fn get_jobs_due(&self) -> Vec<JobRecord> {
        let now = self.now().timestamp();
        records(checked("get_jobs_due", self.storage.get_jobs_due(now)))
    }

    /// Recurring jobs of `extension` (`None` or `"*"` for any).
    pub fn get_recurring_jobs(&self, extension: Option<&str>) -> Vec<JobRecord> {
        let filter = JobFilter::default()
            .recurrence(FilterValue::Any)
            .extension(extension.map(FilterValue::from));
        self.get_jobs(&filter)
    }

    /// Jobs that are neither recurring nor scheduled.
    pub fn get_immediate_jobs(
        &self,
        extension: Option<&str>,
        status: Option<JobStatus>,
    ) -> Vec<JobRecord> {
        let filter = JobFilter::default()
            .recurrence(FilterValue::Missing)
            .scheduled(false)
            .extension(extension.map(FilterValue::from))
            .status(status);
        self.get_jobs(&filter)
    }

    pub fn delete_job(&self, id: &str) -> bool {
        checked("delete_job", self.storage.delete_job(id)).unwrap_or(false)
    }

    pub fn delete_jobs(&self, filter: &JobFilter) -> bool {
        checked("delete_jobs", self.storage.delete_jobs(filter)).unwrap_or(false)
    }

    /// Delete every job.
    pub fn clear(&self) -> bool {
        self.delete_jobs(&JobFilter::default())
    }

    /// Make a suspended job eligible for dispatch again.
    pub fn enable_job(&self, id: &str) -> bool {
        self.set_status(id, JobStatus::Pending)
    }

    pub fn suspend_job(&self, id: &str) -> bool {
        self.set_status(id, JobStatus::Suspended)
    }

    fn set_status(&self, id: &str, status: JobStatus) -> bool {
        let changed = checked("set_status", self.storage.set_status(id, status)).unwrap_or(false);
        if changed {
            info!(job_id = %id, %status, "job status changed");
        }
        changed
    }

    /// The single highest-priority due job, hydrated.
    pub fn get_next(&self) -> Option<Job> {
        let now = self.now().timestamp();
        let record = checked("get_next", self.storage.get_next(now))
            .flatten()
            .and_then(to_record)?;
        self.create_job_from_record(&record)
    }

    /// Resolve `target` if needed, then execute it.
    pub fn run(
        &self,
        target: impl Into<JobTarget>,
        on_progress: Option<ProgressCallback>,
        on_progress_error: Option<ProgressCallback>,
    ) -> Option<Job> {
        let job = match target.into() {
            JobTarget::Id(id) => self.create(&id, None, None)?,
            JobTarget::Job(job) => job,
        };
        Some(self.execute_job(job, on_progress, on_progress_error))
    }

    /// Create a job from `identifier` and execute it. `None` when it cannot be resolved.
    pub fn execute(
        &self,
        identifier: &str,
        extension: Option<&str>,
        params: Option<Map<String, Value>>,
    ) -> Option<Job> {
        let job = self.create(identifier, extension, params)?;
        Some(self.execute_job(job, None, None))
    }

    /// Execute one job, enforcing the lifecycle rules.
    ///
    /// A suspended job is returned with a single suspension error and nothing
    /// else happens. A failing handler leaves its failure in `errors` and the
    /// status untouched. A successful run marks the job `Executed`, stores the
    /// execution time and next run, and writes back handler config.
    pub fn execute_job(
        &self,
        mut job: Job,
        on_progress: Option<ProgressCallback>,
        on_progress_error: Option<ProgressCallback>,
    ) -> Job {
        let label = job.id().unwrap_or("-").to_string();

        if job.status() == JobStatus::Suspended {
            warn!(job_id = %label, name = %job.name(), "job is suspended, not executed");
            job.add_error(SUSPENDED_MESSAGE);
            return job;
        }

        if job.reports_progress() {
            job.set_progress_callbacks(on_progress, on_progress_error);
        }

        let started = self.now().timestamp();
        debug!(job_id = %label, name = %job.name(), "executing job");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run_handler()))
            .unwrap_or_else(|payload| Err(JobFailure(panic_message(payload.as_ref()))));
        if let Err(failure) = outcome {
            warn!(job_id = %label, name = %job.name(), error = %failure, "job failed");
            job.add_error(failure.to_string());
            return job;
        }

        job.set_status(JobStatus::Executed);
        job.set_date_executed(Some(started));
        let context = Value::Object(job.log_context());
        info!(
            job_id = %label,
            name = %job.name(),
            errors = job.errors().len(),
            context = %context,
            "{}",
            job.log_message()
        );

        if let Some(id) = job.id().map(String::from) {
            let next_run = next_run_after(job.kind(), started, self.tz).unwrap_or_else(|e| {
                error!(job_id = %id, "job will not be re-queued: {e}");
                None
            });
            let update = ExecutionUpdate {
                id,
                status: JobStatus::Executed,
                date_executed: started,
                next_run,
            };
            checked("update_execution_status", self.storage.update_execution_status(&update));
        }

        if let Some(config) = job.config() {
            let key = job.id().unwrap_or(job.name()).to_string();
            match serde_json::to_string(&config) {
                Ok(json) => {
                    checked("save_job_config", self.storage.save_job_config(&key, &json));
                }
                Err(e) => warn!(job_id = %key, "job config not serializable: {e}"),
            }
        }

        job
    }

    /// One dispatch tick: execute every due job in priority order.
    ///
    /// Jobs run one after another; a failing job never stops the rest.
    pub fn process_due(&self) -> Vec<Job> {
        let due = self.get_jobs_due();
        if due.is_empty() {
            debug!("no due jobs");
            return Vec::new();
        }

        let mut executed = Vec::with_capacity(due.len());
        for record in &due {
            if let Some(job) = self.create_job_from_record(record) {
                executed.push(self.execute_job(job, None, None));
            }
        }

        let failed = executed.iter().filter(|job| !job.has_success()).count();
        info!(due = due.len(), executed = executed.len(), failed, "due jobs processed");
        executed
    }
}

/// Log a storage error and drop it.
fn checked<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%operation, "storage operation failed: {e}");
            None
        }
    }
}

fn records(rows: Option<Vec<JobRow>>) -> Vec<JobRecord> {
    rows.unwrap_or_default()
        .into_iter()
        .filter_map(to_record)
        .collect()
}

/// Convert a storage row to a record, decoding the config blob.
fn to_record(row: JobRow) -> Option<JobRecord> {
    let Some(id) = row.id else {
        warn!(name = %row.name, "stored job has no id");
        return None;
    };
    let config = row.config.as_deref().and_then(|json| {
        serde_json::from_str::<Value>(json)
            .map_err(|e| warn!(job_id = %id, "stored config is not valid JSON: {e}"))
            .ok()
    });
    Some(JobRecord {
        id,
        name: row.name,
        handler_class: row.handler_class,
        extension_name: row.extension_name,
        priority: row.priority,
        status: row.status,
        recurrence_spec: row.recurrence_spec,
        schedule_time: row.schedule_time,
        config,
        queue: row.queue,
        date_executed: row.date_executed,
        next_run: row.next_run,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {detail}")
}
