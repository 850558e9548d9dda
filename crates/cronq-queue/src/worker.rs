use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::{job::Job, manager::QueueManager};

/// Summary of one executed job, sent to report listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub id: Option<String>,
    pub name: String,
    pub errors: Vec<String>,
    pub date_executed: Option<i64>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

impl From<&Job> for JobReport {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id().map(String::from),
            name: job.name().to_string(),
            errors: job.errors().to_vec(),
            date_executed: job.date_executed(),
        }
    }
}

/// Long-running dispatcher: calls [`QueueManager::process_due`] on a fixed interval.
pub struct QueueWorker {
    manager: Arc<QueueManager>,
    interval: Duration,
    reports: Option<mpsc::Sender<JobReport>>,
}

impl QueueWorker {
    pub fn new(manager: Arc<QueueManager>, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            reports: None,
        }
    }

    /// Send a [`JobReport`] for every executed job. Reports are dropped when
    /// the channel is full so ticks never stall.
    pub fn with_reports(mut self, tx: mpsc::Sender<JobReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Tick until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "queue worker started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("queue worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one dispatch pass off the async runtime. Returns the number of jobs executed.
    pub async fn tick(&self) -> usize {
        let manager = Arc::clone(&self.manager);
        let jobs = match tokio::task::spawn_blocking(move || manager.process_due()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("queue tick aborted: {e}");
                return 0;
            }
        };

        if let Some(tx) = &self.reports {
            for job in &jobs {
                if tx.try_send(JobReport::from(job)).is_err() {
                    warn!(job_id = ?job.id(), "report channel full or closed, report dropped");
                }
            }
        }
        jobs.len()
    }
}
