use std::io::Write;
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::error::{CrontabError, Result};

/// Output `crontab -l` prints when the user has no crontab.
const NO_CRONTAB: &str = "no crontab for";

/// Whole-file access to a user crontab.
pub trait CrontabBackend: Send + Sync {
    /// Current lines. Empty when the user has no crontab.
    fn list(&self) -> Result<Vec<String>>;

    /// Replace the whole crontab with `lines`.
    fn replace(&self, lines: &[String]) -> Result<()>;

    /// Delete the crontab.
    fn remove_all(&self) -> Result<()>;
}

/// Split `crontab -l` output into lines, keeping each line as listed.
pub fn parse_listing(output: &str) -> Vec<String> {
    if output.is_empty() {
        return Vec::new();
    }
    output
        .strip_suffix('\n')
        .unwrap_or(output)
        .split('\n')
        .map(String::from)
        .collect()
}

/// True when failing `crontab` stderr says the user has no crontab.
fn is_no_crontab(stderr: &str) -> bool {
    stderr
        .lines()
        .any(|line| line.trim().to_lowercase().starts_with(NO_CRONTAB))
}

/// The current user's crontab, driven through the `crontab` binary.
#[derive(Debug, Clone)]
pub struct SystemCrontab {
    program: String,
}

impl Default for SystemCrontab {
    fn default() -> Self {
        Self {
            program: "crontab".to_string(),
        }
    }
}

impl SystemCrontab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different `crontab` executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(program = %self.program, ?args, "running crontab");
        Ok(Command::new(&self.program).args(args).output()?)
    }

    fn failure(&self, args: &[&str], output: &Output) -> CrontabError {
        CrontabError::CommandFailed {
            command: format!("{} {}", self.program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

impl CrontabBackend for SystemCrontab {
    fn list(&self) -> Result<Vec<String>> {
        let output = self.run(&["-l"])?;
        if !output.status.success() {
            if is_no_crontab(&String::from_utf8_lossy(&output.stderr)) {
                return Ok(Vec::new());
            }
            return Err(self.failure(&["-l"], &output));
        }
        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn replace(&self, lines: &[String]) -> Result<()> {
        let mut content = lines.join("\n");
        content.push('\n');

        let mut child = Command::new(&self.program)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(content.as_bytes()),
            None => Ok(()),
        };
        // Reap the child even when the write failed.
        let output = child.wait_with_output();
        written?;
        let output = output?;
        if !output.status.success() {
            return Err(self.failure(&["-"], &output));
        }
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        let output = self.run(&["-r"])?;
        if output.status.success() || is_no_crontab(&String::from_utf8_lossy(&output.stderr)) {
            return Ok(());
        }
        Err(self.failure(&["-r"], &output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_crontab_is_read_from_stderr_only() {
        assert!(is_no_crontab("no crontab for alice\n"));
        assert!(is_no_crontab("No Crontab For root"));
        assert!(!is_no_crontab("crontab: permission denied"));
    }

    #[test]
    fn lines_are_kept_as_listed() {
        let lines = parse_listing("# no crontab for db user\n\n0 3 * * * /usr/bin/backup.sh --tag 'x '  \n");
        assert_eq!(
            lines,
            vec!["# no crontab for db user", "", "0 3 * * * /usr/bin/backup.sh --tag 'x '  "]
        );
        assert!(parse_listing("").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn failed_write_is_reported_after_reaping_child() {
        // `true` exits without reading stdin, so a large write hits a closed pipe.
        let backend = SystemCrontab::with_program("true");
        let lines = vec!["x".repeat(1 << 20)];
        assert!(matches!(backend.replace(&lines), Err(CrontabError::Io(_))));
    }

    #[test]
    fn missing_program_is_io_error() {
        let backend = SystemCrontab::with_program("/nonexistent/crontab-binary");
        assert!(matches!(backend.list(), Err(CrontabError::Io(_))));
    }
}
