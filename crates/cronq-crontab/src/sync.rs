use std::path::Path;

use cronq_core::config::{CrontabConfig, DEFAULT_CRON_INTERVAL_MINUTES, SCHEDULER_SUBCOMMAND};
use tracing::{info, warn};

use crate::{
    backend::{CrontabBackend, SystemCrontab},
    error::{CrontabError, Result},
};

/// The crontab line that invokes the scheduler.
///
/// Rendered as `*/<N> * * * * [<interpreter>] <base-path>/<command>`. A line
/// is recognised as the trigger when it ends with `command`, whatever its
/// interval or path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCommand {
    interval_minutes: u32,
    interpreter: Option<String>,
    base_path: String,
    command: String,
}

impl TriggerCommand {
    pub fn new(base_path: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            interval_minutes: DEFAULT_CRON_INTERVAL_MINUTES,
            interpreter: None,
            base_path: base_path.into(),
            command: command.into(),
        }
    }

    pub fn with_interval(mut self, minutes: u32) -> Self {
        self.interval_minutes = minutes;
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Build from config, filling gaps from the running executable.
    pub fn from_config(config: &CrontabConfig) -> Result<Self> {
        let exe = std::env::current_exe()?;
        let base_path = match &config.base_path {
            Some(path) => path.clone(),
            None => exe
                .parent()
                .map(|dir| dir.display().to_string())
                .ok_or_else(|| CrontabError::Trigger("executable has no parent directory".into()))?,
        };
        let command = match &config.command {
            Some(command) => command.clone(),
            None => {
                let binary = exe
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .ok_or_else(|| CrontabError::Trigger("executable has no file name".into()))?;
                default_command(&binary)
            }
        };

        let mut trigger = Self::new(base_path, command).with_interval(config.interval_minutes);
        if let Some(interpreter) = &config.interpreter {
            trigger = trigger.with_interpreter(resolve_interpreter(interpreter));
        }
        Ok(trigger)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn line(&self) -> String {
        let target = format!("{}/{}", self.base_path.trim_end_matches('/'), self.command);
        match &self.interpreter {
            Some(interpreter) => format!("*/{} * * * * {interpreter} {target}", self.interval_minutes),
            None => format!("*/{} * * * * {target}", self.interval_minutes),
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        line.trim_end().ends_with(&self.command)
    }
}

/// `<binary> scheduler >> /dev/null 2>&1`
pub fn default_command(binary: &str) -> String {
    format!("{binary} {SCHEDULER_SUBCOMMAND} >> /dev/null 2>&1")
}

/// Resolve a bare interpreter name to an absolute path through `PATH`.
/// Paths and unresolvable names are returned as given.
pub fn resolve_interpreter(interpreter: &str) -> String {
    if Path::new(interpreter).is_absolute() {
        return interpreter.to_string();
    }
    match which::which(interpreter) {
        Ok(path) => path.display().to_string(),
        Err(e) => {
            warn!(%interpreter, "interpreter not found on PATH, using it as given: {e}");
            interpreter.to_string()
        }
    }
}

/// Snapshot of the crontab as seen by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrontabStatus {
    pub installed: bool,
    pub jobs: Vec<String>,
    pub user: String,
}

/// Keeps exactly one trigger line in a crontab, leaving other lines alone.
///
/// Every change is a full read followed by a full rewrite.
pub struct CrontabSynchronizer<B = SystemCrontab> {
    backend: B,
    trigger: TriggerCommand,
}

impl<B: CrontabBackend> CrontabSynchronizer<B> {
    pub fn new(backend: B, trigger: TriggerCommand) -> Self {
        Self { backend, trigger }
    }

    pub fn trigger(&self) -> &TriggerCommand {
        &self.trigger
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current crontab lines, exactly as listed.
    pub fn jobs(&self) -> Result<Vec<String>> {
        self.backend.list()
    }

    pub fn is_installed(&self) -> Result<bool> {
        Ok(self.jobs()?.iter().any(|line| self.trigger.matches(line)))
    }

    /// Append the trigger line unless one is present. Returns the installed
    /// state read back after the write.
    pub fn install(&self) -> Result<bool> {
        let mut jobs = self.jobs()?;
        if jobs.iter().any(|line| self.trigger.matches(line)) {
            return Ok(true);
        }

        let line = self.trigger.line();
        jobs.push(line.clone());
        self.backend.replace(&jobs)?;
        info!(%line, "crontab trigger installed");
        self.is_installed()
    }

    /// Remove every trigger line. The crontab is deleted when nothing else
    /// remains. Returns true when no trigger line is left.
    pub fn uninstall(&self) -> Result<bool> {
        let jobs = self.jobs()?;
        let kept: Vec<String> = jobs
            .iter()
            .filter(|line| !self.trigger.matches(line))
            .cloned()
            .collect();

        if kept.len() != jobs.len() {
            if kept.iter().all(|line| line.trim().is_empty()) {
                self.backend.remove_all()?;
            } else {
                self.backend.replace(&kept)?;
            }
            info!(removed = jobs.len() - kept.len(), "crontab trigger removed");
        }
        Ok(!self.is_installed()?)
    }

    /// Uninstall, then install with the current trigger line.
    pub fn reinstall(&self) -> Result<bool> {
        self.uninstall()?;
        self.install()
    }

    pub fn status(&self) -> Result<CrontabStatus> {
        let jobs = self.jobs()?;
        let installed = jobs.iter().any(|line| self.trigger.matches(line));
        Ok(CrontabStatus {
            installed,
            jobs,
            user: current_user(),
        })
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_without_interpreter() {
        let trigger = TriggerCommand::new("/opt/cronq/bin/", default_command("cronq"));
        assert_eq!(
            trigger.line(),
            "*/5 * * * * /opt/cronq/bin/cronq scheduler >> /dev/null 2>&1"
        );
    }

    #[test]
    fn line_with_interpreter_and_interval() {
        let trigger = TriggerCommand::new("/srv/app", "cli scheduler >> /dev/null 2>&1")
            .with_interval(10)
            .with_interpreter("/usr/bin/php");
        assert_eq!(
            trigger.line(),
            "*/10 * * * * /usr/bin/php /srv/app/cli scheduler >> /dev/null 2>&1"
        );
    }

    #[test]
    fn matches_on_command_suffix() {
        let trigger = TriggerCommand::new("/opt/cronq", default_command("cronq"));
        assert!(trigger.matches("*/1 * * * * /elsewhere/cronq scheduler >> /dev/null 2>&1"));
        assert!(trigger.matches(&trigger.line()));
        assert!(!trigger.matches("0 3 * * * /usr/bin/backup.sh"));
        assert!(!trigger.matches("*/5 * * * * /opt/cronq/cronq scheduler"));
    }

    #[test]
    fn absolute_interpreter_is_kept() {
        assert_eq!(resolve_interpreter("/usr/local/bin/php"), "/usr/local/bin/php");
        assert_eq!(
            resolve_interpreter("definitely-not-an-interpreter-xyz"),
            "definitely-not-an-interpreter-xyz"
        );
    }

    #[test]
    fn from_config_uses_explicit_values() {
        let config = CrontabConfig {
            interval_minutes: 15,
            interpreter: Some("/usr/bin/env".into()),
            base_path: Some("/srv/cronq".into()),
            command: Some("cronq scheduler".into()),
        };
        let trigger = TriggerCommand::from_config(&config).unwrap();
        assert_eq!(trigger.line(), "*/15 * * * * /usr/bin/env /srv/cronq/cronq scheduler");
    }

    #[test]
    fn from_config_defaults_to_running_binary() {
        let trigger = TriggerCommand::from_config(&CrontabConfig::default()).unwrap();
        assert!(trigger.command().ends_with(" scheduler >> /dev/null 2>&1"));
        assert_eq!(trigger.interval_minutes(), 5);
    }
}
