use std::{
    ffi::OsString,
    process::{Command, Stdio},
};

use tracing::{debug, info};
use wifi_switch_common::ExecutorConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub ok: bool,
    pub detail: String,
}

impl ExecutionOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Performs the physical switch. Implementations block until the remote
/// side answers and must never panic on remote failure.
pub trait Executor: Send + Sync {
    fn apply(&self, desired: bool) -> ExecutionOutcome;
}

/// Runs the configured on/off command on the router through the system
/// `ssh` client in batch mode.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: ExecutorConfig,
    program: OsString,
}

impl SshExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            program: OsString::from("ssh"),
        }
    }

    #[cfg(test)]
    fn with_program(mut self, program: &str) -> Self {
        self.program = OsString::from(program);
        self
    }

    fn command_for(&self, desired: bool) -> &str {
        if desired {
            &self.config.wifi_on_command
        } else {
            &self.config.wifi_off_command
        }
    }

    fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.config.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            format!("{}@{}", self.config.username, self.config.host),
            remote_command.to_string(),
        ]
    }
}

impl Executor for SshExecutor {
    fn apply(&self, desired: bool) -> ExecutionOutcome {
        if !self.config.enabled {
            debug!("executor disabled, skipping wifi {}", on_off(desired));
            return ExecutionOutcome::success("SSH disabled (test mode)");
        }

        let remote_command = self.command_for(desired).trim();
        if remote_command.is_empty() || remote_command.starts_with('#') {
            info!("no wifi {} command configured", on_off(desired));
            return ExecutionOutcome::success("Command not configured");
        }

        info!(
            "running wifi {} command on {}@{}",
            on_off(desired),
            self.config.username,
            self.config.host
        );
        let output = Command::new(&self.program)
            .args(self.ssh_args(remote_command))
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                ExecutionOutcome::success(String::from_utf8_lossy(&output.stdout).trim())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    ExecutionOutcome::failure(format!("remote command failed: {}", output.status))
                } else {
                    ExecutionOutcome::failure(format!(
                        "remote command failed: {}: {stderr}",
                        output.status
                    ))
                }
            }
            Err(err) => ExecutionOutcome::failure(format!(
                "failed to run {}: {err}",
                self.program.to_string_lossy()
            )),
        }
    }
}

fn on_off(desired: bool) -> &'static str {
    if desired {
        "on"
    } else {
        "off"
    }
}
