use thiserror::Error;

/// Errors that can occur within the queue subsystem.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The recurrence spec is neither a cron expression nor a duration interval.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Storage backend failure not covered by a more specific variant.
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
