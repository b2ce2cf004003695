//! Shell runner for success criteria and post-checks.
//!
//! Commands run through `bash -lc` with full host privileges; there is no
//! sandboxing. Output is captured, never streamed.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code POSIX shells use for "command not found".
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to spawn shell: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;

/// Captured result of one shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    /// `None` when the command was killed (timeout or signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// The shell could not find the program named by the command.
    pub fn command_not_found(&self) -> bool {
        self.exit_code == Some(EXIT_COMMAND_NOT_FOUND)
            || self.stderr.to_lowercase().contains("command not found")
    }

    /// stdout followed by stderr, for diagnostics.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Executes shell commands in a working directory.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    /// Run `command`; a zero `timeout` means no limit.
    async fn run(&self, command: &str, workdir: &Path, timeout: Duration) -> Result<ShellOutput>;
}

/// `bash -lc "<command>"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BashShell;

#[async_trait]
impl ShellExecutor for BashShell {
    async fn run(&self, command: &str, workdir: &Path, timeout: Duration) -> Result<ShellOutput> {
        debug!(cmd = %command, workdir = %workdir.display(), "running shell command");
        let started = Instant::now();

        let child = Command::new("bash")
            .arg("-lc")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the `wait_with_output` future on timeout drops the child,
        // which kills it.
        let waited = if timeout.is_zero() {
            Some(child.wait_with_output().await?)
        } else {
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => Some(output?),
                Err(_) => None,
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let Some(output) = waited else {
            warn!(cmd = %command, timeout_sec = timeout.as_secs(), "shell command timed out");
            return Ok(ShellOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("timed out after {}s", timeout.as_secs()),
                timed_out: true,
                duration_ms,
            });
        };

        let result = ShellOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
            duration_ms,
        };
        debug!(cmd = %command, exit_code = ?result.exit_code, duration_ms, "shell command finished");
        Ok(result)
    }
}
