//! `cronq-core`: configuration and error types shared by every cronq crate.

pub mod config;
pub mod error;

pub use config::CronqConfig;
pub use error::{CronqError, Result};
