//! `cronq-crontab`: keeps the scheduler's trigger line in the OS crontab.
//!
//! The crontab is shared with other tools, so the synchronizer only ever
//! touches lines ending in its own command and rewrites the file as a whole.

pub mod backend;
pub mod error;
pub mod sync;

pub use backend::{CrontabBackend, SystemCrontab};
pub use error::{CrontabError, Result};
pub use sync::{CrontabStatus, CrontabSynchronizer, TriggerCommand};
