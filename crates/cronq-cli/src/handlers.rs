use std::process::Command;

use cronq_queue::{Configurable, HandlerRegistry, JobContext, JobFailure, JobHandler};
use serde_json::{json, Map, Value};

/// Handler class of [`ShellJob`].
pub const SHELL_HANDLER: &str = "shell";

/// Captured stdout kept in job output.
const MAX_OUTPUT_CHARS: usize = 2000;

/// Registry with every built-in handler.
pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(SHELL_HANDLER, |params| Box::new(ShellJob::from_params(params)));
    registry
}

/// Runs a command through `sh -c`. The command lives in the job config, so
/// it survives persistence along with the last exit code.
#[derive(Debug, Default)]
pub struct ShellJob {
    command: Option<String>,
    last_exit_code: Option<i32>,
    runs: u64,
}

impl ShellJob {
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            command: params
                .get("command")
                .and_then(Value::as_str)
                .map(String::from),
            ..Self::default()
        }
    }
}

impl Configurable for ShellJob {
    fn config(&self) -> Value {
        json!({
            "command": self.command,
            "last_exit_code": self.last_exit_code,
            "runs": self.runs,
        })
    }

    fn set_config(&mut self, config: Value) {
        if let Some(command) = config["command"].as_str() {
            self.command = Some(command.to_string());
        }
        self.last_exit_code = config["last_exit_code"].as_i64().map(|c| c as i32);
        self.runs = config["runs"].as_u64().unwrap_or(0);
    }
}

impl JobHandler for ShellJob {
    fn execute(&mut self, ctx: &mut JobContext<'_>) -> Result<(), JobFailure> {
        let Some(command) = self.command.clone() else {
            return Err("no command configured".into());
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .map_err(|e| JobFailure(format!("failed to start `sh`: {e}")))?;

        self.runs += 1;
        self.last_exit_code = output.status.code();
        ctx.add_output("Exit code", self.last_exit_code, Some("exit_code"));

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if !stdout.is_empty() {
            let captured: String = stdout.chars().take(MAX_OUTPUT_CHARS).collect();
            ctx.add_output("Output", captured, Some("stdout"));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobFailure(format!(
                "`{command}` exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        ctx.set_log_message(format!("Command `{command}` finished."));
        Ok(())
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(self)
    }

    fn as_configurable_mut(&mut self) -> Option<&mut dyn Configurable> {
        Some(self)
    }
}
