use thiserror::Error;

/// Errors raised while reading or rewriting the OS crontab.
#[derive(Debug, Error)]
pub enum CrontabError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `crontab` ran but exited with a failure status.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Cannot determine trigger command: {0}")]
    Trigger(String),
}

pub type Result<T> = std::result::Result<T, CrontabError>;
