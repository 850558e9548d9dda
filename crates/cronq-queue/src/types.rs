use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// In memory only, never persisted.
    #[default]
    Created,
    /// Persisted and eligible for dispatch once due.
    Pending,
    /// Persisted but never dispatched until re-enabled.
    Suspended,
    /// The most recent attempt ran to completion.
    Executed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::Suspended => "suspended",
            JobStatus::Executed => "executed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "pending" => Ok(JobStatus::Pending),
            "suspended" => Ok(JobStatus::Suspended),
            "executed" => Ok(JobStatus::Executed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// The scheduling facet of a job. Exactly one variant applies at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Due once, immediately.
    #[default]
    Immediate,
    /// Repeats per a cron expression or a duration interval ("5 minutes").
    Recurring { spec: String },
    /// Due once at/after `at` (epoch seconds). `at == 0` means unset.
    Scheduled { at: i64 },
}

impl JobKind {
    /// Rebuild the facet from persisted columns. A recurrence spec wins over a
    /// schedule time if a record somehow carries both.
    pub fn from_parts(recurrence_spec: Option<String>, schedule_time: Option<i64>) -> Self {
        match (recurrence_spec, schedule_time) {
            (Some(spec), _) if !spec.trim().is_empty() => JobKind::Recurring { spec },
            (_, Some(at)) => JobKind::Scheduled { at },
            _ => JobKind::Immediate,
        }
    }

    pub fn recurrence_spec(&self) -> Option<&str> {
        match self {
            JobKind::Recurring { spec } => Some(spec),
            _ => None,
        }
    }

    pub fn schedule_time(&self) -> Option<i64> {
        match self {
            JobKind::Scheduled { at } => Some(*at),
            _ => None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, JobKind::Recurring { .. })
    }
}

/// A persisted job as seen by callers of the queue manager.
///
/// The schema is closed: deserializing a record with unexpected keys fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobRecord {
    /// UUID v4 string, assigned on first persist.
    pub id: String,
    pub name: String,
    pub handler_class: String,
    #[serde(default)]
    pub extension_name: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub status: JobStatus,
    #[serde(default)]
    pub recurrence_spec: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub schedule_time: Option<i64>,
    /// Handler configuration, decoded from its stored JSON string.
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub queue: Option<String>,
    /// Epoch seconds of the last successful run start.
    #[serde(default)]
    pub date_executed: Option<i64>,
    /// Precomputed epoch seconds at which the job next becomes due.
    #[serde(default)]
    pub next_run: Option<i64>,
}

impl JobRecord {
    pub fn kind(&self) -> JobKind {
        JobKind::from_parts(self.recurrence_spec.clone(), self.schedule_time)
    }
}

/// Match rule for an optional text column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// Column is set to any value (`"*"`).
    Any,
    /// Column is NULL.
    Missing,
    /// Column equals the given value.
    Exact(String),
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        if s == "*" {
            FilterValue::Any
        } else {
            FilterValue::Exact(s.to_string())
        }
    }
}

/// Storage query filter. `None` fields are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub recurrence_spec: Option<FilterValue>,
    pub extension_name: Option<FilterValue>,
    pub status: Option<JobStatus>,
    /// `Some(true)` keeps jobs with a schedule time, `Some(false)` those without.
    pub scheduled: Option<bool>,
}

impl JobFilter {
    pub fn recurrence(mut self, value: impl Into<Option<FilterValue>>) -> Self {
        self.recurrence_spec = value.into();
        self
    }

    pub fn extension(mut self, value: impl Into<Option<FilterValue>>) -> Self {
        self.extension_name = value.into();
        self
    }

    pub fn status(mut self, status: impl Into<Option<JobStatus>>) -> Self {
        self.status = status.into();
        self
    }

    pub fn scheduled(mut self, scheduled: impl Into<Option<bool>>) -> Self {
        self.scheduled = scheduled.into();
        self
    }
}

/// One labelled value emitted by a handler during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    pub label: String,
    pub value: Value,
    /// Items with the same key replace each other.
    pub key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Created,
            JobStatus::Pending,
            JobStatus::Suspended,
            JobStatus::Executed,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn kind_from_parts_prefers_recurrence() {
        assert_eq!(
            JobKind::from_parts(Some("5 minutes".into()), Some(100)),
            JobKind::Recurring {
                spec: "5 minutes".into()
            }
        );
        assert_eq!(
            JobKind::from_parts(None, Some(100)),
            JobKind::Scheduled { at: 100 }
        );
        assert_eq!(JobKind::from_parts(Some("  ".into()), None), JobKind::Immediate);
        assert_eq!(JobKind::from_parts(None, None), JobKind::Immediate);
    }

    #[test]
    fn record_rejects_unknown_keys() {
        let json = r#"{
            "id": "a", "name": "n", "handler_class": "shell", "status": "pending",
            "surprise": true
        }"#;
        assert!(serde_json::from_str::<JobRecord>(json).is_err());
    }

    #[test]
    fn record_optional_fields_default() {
        let json = r#"{"id": "a", "name": "n", "handler_class": "shell", "status": "executed"}"#;
        let record: JobRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.priority, 0);
        assert_eq!(record.status, JobStatus::Executed);
        assert_eq!(record.kind(), JobKind::Immediate);
    }

    #[test]
    fn wildcard_filter_value() {
        assert_eq!(FilterValue::from("*"), FilterValue::Any);
        assert_eq!(FilterValue::from("mail"), FilterValue::Exact("mail".into()));
    }
}
