//! Test-runner adapter that executes the assembled command through the
//! platform shell.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use jestcheck_ports::{RunOutput, RunnerError, TestRunner};
use tokio::process::Command;

/// Runs commands with `sh -c` (or `cmd /C` on Windows).
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn shell_command(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }
}

#[async_trait]
impl TestRunner for ShellRunner {
    async fn run(&self, command: &str, working_dir: &Path) -> Result<RunOutput, RunnerError> {
        tracing::info!(command, working_dir = %working_dir.display(), "running tests");

        let output = Self::shell_command(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RunnerError {
                command: command.to_string(),
                source,
            })?;

        let result = RunOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(
            exit_code = ?result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "test command finished"
        );
        Ok(result)
    }
}
