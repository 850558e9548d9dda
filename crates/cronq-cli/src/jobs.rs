use anyhow::{bail, Context, Result};
use chrono::DateTime;
use cronq_queue::{
    schedule, AddJobOptions, CronSpec, FilterValue, JobFilter, JobKind, JobRecord, QueueManager,
};
use serde_json::{json, Map};

use crate::cli::{AddArgs, JobCommands};
use crate::handlers::SHELL_HANDLER;

pub fn run(manager: &QueueManager, command: JobCommands) -> Result<()> {
    match command {
        JobCommands::List {
            extension,
            status,
            recurring,
        } => {
            let mut filter = JobFilter::default()
                .extension(extension.as_deref().map(FilterValue::from))
                .status(status);
            if recurring {
                filter = filter.recurrence(FilterValue::Any);
            }
            print_jobs(&manager.get_jobs(&filter));
        }
        JobCommands::Add(args) => add(manager, args)?,
        JobCommands::Run { id } => {
            let Some(job) = manager.run(id.as_str(), None, None) else {
                bail!("no job or handler named {id}");
            };
            if !job.has_success() {
                bail!("job {} failed: {}", job.name(), job.errors().join("; "));
            }
            println!("{}", job.log_message());
            for item in job.output() {
                println!("  {}: {}", item.label, item.value);
            }
        }
        JobCommands::Delete { id } => {
            if !manager.delete_job(&id) {
                bail!("no job with id {id}");
            }
            println!("deleted {id}");
        }
        JobCommands::Enable { id } => {
            if !manager.enable_job(&id) {
                bail!("no job with id or name {id}");
            }
            println!("enabled {id}");
        }
        JobCommands::Suspend { id } => {
            if !manager.suspend_job(&id) {
                bail!("no job with id or name {id}");
            }
            println!("suspended {id}");
        }
        JobCommands::Clear => {
            if !manager.clear() {
                bail!("failed to clear jobs");
            }
            println!("all jobs deleted");
        }
    }
    Ok(())
}

fn add(manager: &QueueManager, args: AddArgs) -> Result<()> {
    let mut options = AddJobOptions::default().disabled(args.disabled);
    if let Some(expression) = args.cron {
        options = options.recurrence(expression);
    } else if let Some(interval) = args.every {
        if !schedule::is_duration_interval(&interval) {
            bail!("not a duration interval: {interval}");
        }
        options = options.recurrence(interval);
    } else if let Some(time) = args.daily {
        options = options.recurrence(CronSpec::daily_at(&time)?.expression());
    } else if let Some(at) = args.at {
        let at = DateTime::parse_from_rfc3339(&at)
            .with_context(|| format!("invalid --at instant: {at}"))?;
        options = options.schedule_time(at.timestamp());
    }
    if let Some(extension) = args.extension {
        options = options.extension(extension);
    }

    let mut params = Map::new();
    params.insert("command".into(), json!(args.command));
    let Some(job) = manager.create(SHELL_HANDLER, None, Some(params)) else {
        bail!("shell handler is not registered");
    };
    let mut job = job
        .with_priority(args.priority)
        .with_name(args.name.unwrap_or(args.command));

    if !manager.add_job(&mut job, options) {
        bail!("job was not added, see the log for details");
    }
    println!("{}", job.id().unwrap_or_default());
    Ok(())
}

fn print_jobs(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("no jobs");
        return;
    }
    println!(
        "{:<36}  {:<24}  {:<9}  {:>4}  {:<20}  {:<25}",
        "ID", "NAME", "STATUS", "PRIO", "SCHEDULE", "NEXT RUN"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<24}  {:<9}  {:>4}  {:<20}  {:<25}",
            job.id,
            truncate(&job.name, 24),
            job.status,
            job.priority,
            truncate(&describe(&job.kind()), 20),
            format_ts(job.next_run),
        );
    }
}

fn describe(kind: &JobKind) -> String {
    match kind {
        JobKind::Immediate => "immediate".to_string(),
        JobKind::Recurring { spec } => spec.clone(),
        JobKind::Scheduled { at } => format!("at {}", format_ts(Some(*at))),
    }
}

fn format_ts(ts: Option<i64>) -> String {
    ts.and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push('~');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_each_kind() {
        assert_eq!(describe(&JobKind::Immediate), "immediate");
        assert_eq!(
            describe(&JobKind::Recurring {
                spec: "*/5 * * * *".into()
            }),
            "*/5 * * * *"
        );
        assert_eq!(
            describe(&JobKind::Scheduled { at: 0 }),
            "at 1970-01-01T00:00:00+00:00"
        );
        assert_eq!(format_ts(None), "-");
    }

    #[test]
    fn long_names_are_cut() {
        assert_eq!(truncate("backup", 10), "backup");
        assert_eq!(truncate("nightly-database-backup", 10), "nightly-d~");
    }
}
