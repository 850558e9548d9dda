//! `cronq-queue`: job queue with recurring and scheduled jobs on SQLite.
//!
//! # Overview
//!
//! Jobs are live [`Job`] objects wrapping a [`JobHandler`]; persisted jobs are
//! [`JobRecord`] rows. The [`QueueManager`] adds, hydrates and executes jobs
//! and keeps the precomputed `next_run` column current, so due selection is a
//! single indexed query. The [`QueueWorker`] calls the manager on an interval.
//!
//! # Job kinds
//!
//! | Kind        | Due when                                       | After a clean run   |
//! |-------------|------------------------------------------------|---------------------|
//! | `Immediate` | as soon as it is pending                       | terminal            |
//! | `Recurring` | next cron/interval occurrence has passed       | next occurrence     |
//! | `Scheduled` | its schedule time has passed                   | terminal            |
//!
//! Recurrence specs are 5-field cron expressions (`*/5 * * * *`) or duration
//! intervals (`30 minutes`, `PT1H`).

pub mod db;
pub mod error;
pub mod factory;
pub mod job;
pub mod manager;
pub mod schedule;
pub mod storage;
pub mod types;
pub mod worker;

pub use db::SqliteStorage;
pub use error::{QueueError, Result};
pub use factory::{HandlerRegistry, JobFactory};
pub use job::{Configurable, Job, JobContext, JobFailure, JobHandler, ProgressCallback};
pub use manager::{AddJobOptions, JobTarget, QueueManager};
pub use schedule::CronSpec;
pub use storage::{ExecutionUpdate, JobRow, QueueStorage};
pub use types::{FilterValue, JobFilter, JobKind, JobRecord, JobStatus, OutputItem};
pub use worker::{JobReport, QueueWorker};
