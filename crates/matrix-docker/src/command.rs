//! Host process execution with timeout and output capture.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::DockerError;

/// Captured result of one host command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,

    /// The command was killed after exceeding its timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Run `program args..` and wait for it, killing it after `timeout`.
///
/// Spawn failures are errors; a non-zero exit or a timeout is not.
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<CommandOutput, DockerError> {
    let start = Instant::now();

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| DockerError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output()).await.ok(),
        None => Some(child.wait_with_output().await),
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    match waited {
        Some(output) => {
            let output = output.map_err(|source| DockerError::Wait {
                program: program.to_string(),
                source,
            })?;
            Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration_ms,
                timed_out: false,
            })
        }
        // The child was dropped with the timed-out future; kill_on_drop reaps it.
        None => Ok(CommandOutput {
            exit_code: matrix_core::EXIT_TIMEOUT,
            stdout: String::new(),
            stderr: format!(
                "{} timed out after {}s",
                program,
                timeout.map(|t| t.as_secs()).unwrap_or_default()
            ),
            duration_ms,
            timed_out: true,
        }),
    }
}
