use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{JobKind, JobStatus, OutputItem};

/// Error message recorded when a suspended job is asked to run.
pub const SUSPENDED_MESSAGE: &str = "Job is suspended.";
/// Log message used when a handler does not set its own.
pub const DEFAULT_LOG_MESSAGE: &str = "Job executed.";

/// Callback a handler may invoke while running.
pub type ProgressCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Failure reported by a handler's `execute`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct JobFailure(pub String);

impl From<String> for JobFailure {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for JobFailure {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// The executable logic behind a job.
///
/// Optional capabilities are exposed through the `as_*` accessors; the queue
/// manager only calls capability methods when the accessor returns `Some`.
pub trait JobHandler: Send {
    /// Run the job. Non-fatal problems may be recorded with
    /// [`JobContext::add_error`] while still returning `Ok`.
    fn execute(&mut self, ctx: &mut JobContext<'_>) -> Result<(), JobFailure>;

    /// Scheduling facet for jobs created from this handler.
    fn default_kind(&self) -> JobKind {
        JobKind::Immediate
    }

    /// Default priority for jobs created from this handler.
    fn default_priority(&self) -> i32 {
        0
    }

    /// Whether the handler reports progress through [`JobContext::progress`].
    fn reports_progress(&self) -> bool {
        false
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        None
    }

    fn as_configurable_mut(&mut self) -> Option<&mut dyn Configurable> {
        None
    }
}

/// Capability for handlers with persisted configuration.
pub trait Configurable {
    /// Current configuration, written back after a successful run.
    fn config(&self) -> Value;
    /// Apply configuration loaded from storage before the run.
    fn set_config(&mut self, config: Value);
}

/// Progress callbacks attached by the orchestrator before a run.
#[derive(Clone, Default)]
pub struct JobProgress {
    on_progress: Option<ProgressCallback>,
    on_progress_error: Option<ProgressCallback>,
}

impl JobProgress {
    pub fn new(on_progress: Option<ProgressCallback>, on_progress_error: Option<ProgressCallback>) -> Self {
        Self {
            on_progress,
            on_progress_error,
        }
    }

    pub fn progress(&self, value: &Value) {
        if let Some(callback) = &self.on_progress {
            callback(value);
        }
    }

    pub fn progress_error(&self, value: &Value) {
        if let Some(callback) = &self.on_progress_error {
            callback(value);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.on_progress.is_some() || self.on_progress_error.is_some()
    }
}

impl std::fmt::Debug for JobProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProgress")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_progress_error", &self.on_progress_error.is_some())
            .finish()
    }
}

/// What a handler sees of its job while running.
pub struct JobContext<'a> {
    params: &'a Map<String, Value>,
    progress: &'a JobProgress,
    errors: &'a mut Vec<String>,
    output: &'a mut Vec<OutputItem>,
    log_message: &'a mut Option<String>,
}

impl JobContext<'_> {
    pub fn params(&self) -> &Map<String, Value> {
        self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn progress(&self, value: impl Into<Value>) {
        self.progress.progress(&value.into());
    }

    pub fn progress_error(&self, value: impl Into<Value>) {
        self.progress.progress_error(&value.into());
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Append an output item. A keyed item replaces an earlier one with the same key.
    pub fn add_output(&mut self, label: impl Into<String>, value: impl Into<Value>, key: Option<&str>) {
        let item = OutputItem {
            label: label.into(),
            value: value.into(),
            key: key.map(String::from),
        };
        if let Some(key) = key {
            if let Some(existing) = self
                .output
                .iter_mut()
                .find(|o| o.key.as_deref() == Some(key))
            {
                *existing = item;
                return;
            }
        }
        self.output.push(item);
    }

    pub fn set_log_message(&mut self, message: impl Into<String>) {
        *self.log_message = Some(message.into());
    }
}

/// A live, executable job: common fields, the scheduling facet and the handler.
pub struct Job {
    id: Option<String>,
    name: Option<String>,
    handler_class: String,
    extension: Option<String>,
    priority: i32,
    status: JobStatus,
    errors: Vec<String>,
    date_executed: Option<i64>,
    queue: Option<String>,
    params: Map<String, Value>,
    kind: JobKind,
    output: Vec<OutputItem>,
    log_message: Option<String>,
    progress: JobProgress,
    handler: Box<dyn JobHandler>,
}

impl Job {
    pub fn new(handler_class: impl Into<String>, handler: Box<dyn JobHandler>) -> Self {
        let kind = handler.default_kind();
        let priority = handler.default_priority();
        Self {
            id: None,
            name: None,
            handler_class: handler_class.into(),
            extension: None,
            priority,
            status: JobStatus::Created,
            errors: Vec::new(),
            date_executed: None,
            queue: None,
            params: Map::new(),
            kind,
            output: Vec::new(),
            log_message: None,
            progress: JobProgress::default(),
            handler,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Assign the storage id. Returns false, leaving the id untouched, when one
    /// is already set.
    pub fn assign_id(&mut self, id: impl Into<String>) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id.into());
        true
    }

    /// The explicit name, else the handler type name.
    pub fn name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => base_name(&self.handler_class),
        }
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn handler_class(&self) -> &str {
        &self.handler_class
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn set_extension(&mut self, extension: Option<String>) {
        self.extension = extension;
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Change the status. Going back to `Created` clears the error history.
    pub fn set_status(&mut self, status: JobStatus) {
        if status == JobStatus::Created {
            self.errors.clear();
        }
        self.status = status;
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// True when the last attempt left no errors.
    pub fn has_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn date_executed(&self) -> Option<i64> {
        self.date_executed
    }

    pub fn set_date_executed(&mut self, ts: Option<i64>) {
        self.date_executed = ts;
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn set_queue(&mut self, queue: Option<String>) {
        self.queue = queue;
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn set_kind(&mut self, kind: JobKind) {
        self.kind = kind;
    }

    pub fn output(&self) -> &[OutputItem] {
        &self.output
    }

    pub fn log_message(&self) -> &str {
        self.log_message.as_deref().unwrap_or(DEFAULT_LOG_MESSAGE)
    }

    /// Output values keyed by label (or key), for log context.
    pub fn log_context(&self) -> Map<String, Value> {
        self.output
            .iter()
            .map(|item| {
                let key = item.key.clone().unwrap_or_else(|| item.label.clone());
                (key, item.value.clone())
            })
            .collect()
    }

    pub fn reports_progress(&self) -> bool {
        self.handler.reports_progress()
    }

    pub fn set_progress_callbacks(
        &mut self,
        on_progress: Option<ProgressCallback>,
        on_progress_error: Option<ProgressCallback>,
    ) {
        self.progress = JobProgress::new(on_progress, on_progress_error);
    }

    /// Handler configuration, if the handler is config-aware.
    pub fn config(&self) -> Option<Value> {
        self.handler.as_configurable().map(|c| c.config())
    }

    /// Apply configuration. Returns false when the handler is not config-aware.
    pub fn apply_config(&mut self, config: Value) -> bool {
        match self.handler.as_configurable_mut() {
            Some(configurable) => {
                configurable.set_config(config);
                true
            }
            None => false,
        }
    }

    /// Invoke the handler with a context borrowing this job's state.
    pub(crate) fn run_handler(&mut self) -> Result<(), JobFailure> {
        self.output.clear();
        let mut ctx = JobContext {
            params: &self.params,
            progress: &self.progress,
            errors: &mut self.errors,
            output: &mut self.output,
            log_message: &mut self.log_message,
        };
        self.handler.execute(&mut ctx)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("handler_class", &self.handler_class)
            .field("extension", &self.extension)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("errors", &self.errors)
            .field("date_executed", &self.date_executed)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn base_name(class: &str) -> &str {
    class
        .rsplit(|c: char| c == ':' || c == '\\' || c == '.')
        .next()
        .unwrap_or(class)
}
