//! Command-line interface for cronq.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use cronq_queue::JobStatus;

/// cronq - a persistent job queue driven by the OS crontab.
#[derive(Parser)]
#[command(name = "cronq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CRONQ_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute every due job once (the crontab target)
    Scheduler,

    /// Poll for due jobs until interrupted
    Worker {
        /// Seconds between ticks (default: scheduler.poll_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Manage the crontab trigger line
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },

    /// Manage queued jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand)]
pub enum CronCommands {
    /// Add the trigger line unless it is present
    Install,
    /// Remove the trigger line
    Uninstall,
    /// Remove and add the trigger line again
    Reinstall,
    /// Show the crontab and whether the trigger is installed
    Status,
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs
    List {
        /// Only jobs of this extension ("*" for any)
        #[arg(long)]
        extension: Option<String>,

        /// Only jobs in this status (created, pending, suspended, executed)
        #[arg(long)]
        status: Option<JobStatus>,

        /// Only recurring jobs
        #[arg(long)]
        recurring: bool,
    },

    /// Queue a shell command
    Add(AddArgs),

    /// Execute a job now, regardless of its schedule
    Run { id: String },

    /// Delete a job
    Delete { id: String },

    /// Make a suspended job eligible again
    Enable { id: String },

    /// Stop a job from being dispatched
    Suspend { id: String },

    /// Delete every job
    Clear,
}

#[derive(Args)]
pub struct AddArgs {
    /// Shell command to run (`sh -c`)
    #[arg(long)]
    pub command: String,

    /// Job name (default: the command)
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,

    #[arg(long)]
    pub extension: Option<String>,

    /// Cron expression, e.g. "*/5 * * * *"
    #[arg(long, conflicts_with_all = ["every", "daily", "at"])]
    pub cron: Option<String>,

    /// Interval, e.g. "30 minutes" or "PT1H"
    #[arg(long, conflicts_with_all = ["daily", "at"])]
    pub every: Option<String>,

    /// Every day at HH:MM
    #[arg(long, conflicts_with = "at")]
    pub daily: Option<String>,

    /// Run once at an RFC 3339 instant
    #[arg(long)]
    pub at: Option<String>,

    /// Add as suspended
    #[arg(long)]
    pub disabled: bool,
}
