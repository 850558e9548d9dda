use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronqError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown time zone: {0}")]
    TimeZone(String),
}

pub type Result<T> = std::result::Result<T, CronqError>;
