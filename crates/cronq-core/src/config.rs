use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CRON_INTERVAL_MINUTES: u32 = 5;
pub const DEFAULT_TIMEZONE: &str = "UTC";
/// Subcommand the installed crontab line invokes.
pub const SCHEDULER_SUBCOMMAND: &str = "scheduler";

/// Top-level config (cronq.toml + CRONQ_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronqConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub crontab: CrontabConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Due-date evaluation and worker loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone name cron expressions are evaluated in (default: "UTC").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Seconds between two ticks of `cronq worker`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured zone name.
    pub fn timezone(&self) -> crate::error::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| crate::error::CronqError::TimeZone(self.timezone.clone()))
    }
}

/// OS crontab trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrontabConfig {
    /// Minutes between two scheduler invocations (`*/N * * * *`).
    #[serde(default = "default_cron_interval")]
    pub interval_minutes: u32,
    /// Interpreter placed before the entry point. Bare names are resolved
    /// through `PATH`; leave unset for native binaries.
    pub interpreter: Option<String>,
    /// Directory holding the entry point. Defaults to the running binary's directory.
    pub base_path: Option<String>,
    /// Command suffix identifying the trigger line.
    /// Defaults to `<binary> scheduler >> /dev/null 2>&1`.
    pub command: Option<String>,
}

impl Default for CrontabConfig {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_CRON_INTERVAL_MINUTES,
            interpreter: None,
            base_path: None,
            command: None,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronq/cronq.db", home)
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_cron_interval() -> u32 {
    DEFAULT_CRON_INTERVAL_MINUTES
}

impl CronqConfig {
    /// Load config from a TOML file with CRONQ_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CRONQ_SCHEDULER__POLL_INTERVAL_SECS=30`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CronqConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONQ_").split("__"))
            .extract()
            .map_err(|e| crate::error::CronqError::Config(e.to_string()))?;

        if config.crontab.interval_minutes == 0 || config.crontab.interval_minutes > 59 {
            return Err(crate::error::CronqError::Config(format!(
                "crontab.interval_minutes must be within 1..=59, got {}",
                config.crontab.interval_minutes
            )));
        }

        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronq/cronq.toml", home)
}
