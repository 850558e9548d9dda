use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cronq_core::CronqConfig;
use cronq_crontab::{CrontabSynchronizer, SystemCrontab, TriggerCommand};
use cronq_queue::{QueueManager, QueueWorker, SqliteStorage};
use tracing::{info, warn};

mod cli;
mod handlers;
mod jobs;

use cli::{Cli, Commands, CronCommands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cronq=info,cronq_queue=info,cronq_crontab=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: explicit path > CRONQ_CONFIG env > ~/.cronq/cronq.toml
    let config_path = cli.config.as_ref().map(|p| p.display().to_string());
    let config = CronqConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CronqConfig::default()
    });

    match cli.command {
        Commands::Scheduler => {
            let manager = open_manager(&config)?;
            let jobs = manager.process_due();
            let failed = jobs.iter().filter(|job| !job.has_success()).count();
            info!(executed = jobs.len(), failed, "scheduler run complete");
        }
        Commands::Worker { interval } => {
            let manager = open_manager(&config)?;
            let secs = interval.unwrap_or(config.scheduler.poll_interval_secs).max(1);
            run_worker(manager, Duration::from_secs(secs)).await?;
        }
        Commands::Cron { command } => cron(&config, command)?,
        Commands::Jobs { command } => {
            let manager = open_manager(&config)?;
            jobs::run(&manager, command)?;
        }
    }
    Ok(())
}

/// Open the job database and build a manager with the built-in handlers.
fn open_manager(config: &CronqConfig) -> anyhow::Result<QueueManager> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)
        .with_context(|| format!("cannot open database {db_path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    let storage = SqliteStorage::new(db)?;

    let tz = config.scheduler.timezone().unwrap_or_else(|e| {
        warn!("{e}, evaluating cron expressions in UTC");
        chrono_tz::Tz::UTC
    });

    Ok(QueueManager::new(Arc::new(storage), Arc::new(handlers::registry())).with_timezone(tz))
}

async fn run_worker(manager: QueueManager, interval: Duration) -> anyhow::Result<()> {
    let (report_tx, mut report_rx) = tokio::sync::mpsc::channel(256);
    let worker = QueueWorker::new(Arc::new(manager), interval).with_reports(report_tx);

    tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            let id = report.id.as_deref().unwrap_or("-");
            if report.succeeded() {
                println!("ok      {id}  {}", report.name);
            } else {
                println!("failed  {id}  {}: {}", report.name, report.errors.join("; "));
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}

fn cron(config: &CronqConfig, command: CronCommands) -> anyhow::Result<()> {
    let trigger = TriggerCommand::from_config(&config.crontab)?;
    let sync = CrontabSynchronizer::new(SystemCrontab::new(), trigger);

    match command {
        CronCommands::Install => {
            if !sync.install()? {
                anyhow::bail!("trigger line not found after writing the crontab");
            }
            println!("installed: {}", sync.trigger().line());
        }
        CronCommands::Uninstall => {
            if !sync.uninstall()? {
                anyhow::bail!("trigger line still present after writing the crontab");
            }
            println!("uninstalled");
        }
        CronCommands::Reinstall => {
            if !sync.reinstall()? {
                anyhow::bail!("trigger line not found after writing the crontab");
            }
            println!("installed: {}", sync.trigger().line());
        }
        CronCommands::Status => {
            let status = sync.status()?;
            println!("user:      {}", status.user);
            println!("installed: {}", status.installed);
            println!("trigger:   {}", sync.trigger().line());
            if status.jobs.is_empty() {
                println!("crontab:   (empty)");
            } else {
                println!("crontab:");
                for line in &status.jobs {
                    println!("  {line}");
                }
            }
        }
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
