//! Ordered post-check commands, run after criteria pass.

use crate::shell::{Result, ShellExecutor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostCheckOutcome {
    pub passed: bool,
    /// Output of every command that ran, each under a `$ <command>` header.
    pub output: String,
    pub failed_command: Option<String>,
    pub exit_code: Option<i32>,
    pub commands_run: u32,
}

#[derive(Clone)]
pub struct PostCheckRunner {
    shell: Arc<dyn ShellExecutor>,
    timeout: Duration,
}

impl std::fmt::Debug for PostCheckRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostCheckRunner")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PostCheckRunner {
    pub fn new(shell: Arc<dyn ShellExecutor>, timeout: Duration) -> Self {
        Self { shell, timeout }
    }

    /// Run `commands` in order, stopping at the first failure.
    pub async fn run(&self, commands: &[String], workdir: &Path) -> Result<PostCheckOutcome> {
        let mut outcome = PostCheckOutcome {
            passed: true,
            ..Default::default()
        };

        for command in commands {
            let shell = self.shell.run(command, workdir, self.timeout).await?;
            outcome.commands_run += 1;
            outcome.output.push_str(&format!("$ {command}\n"));
            let text = shell.combined();
            if !text.is_empty() {
                outcome.output.push_str(&text);
                outcome.output.push('\n');
            }
            if shell.timed_out {
                outcome
                    .output
                    .push_str(&format!("timed out after {}s\n", self.timeout.as_secs()));
            }

            if !shell.success() {
                warn!(cmd = %command, exit_code = ?shell.exit_code, "post-check failed");
                outcome.passed = false;
                outcome.failed_command = Some(command.clone());
                outcome.exit_code = shell.exit_code;
                break;
            }
            debug!(cmd = %command, "post-check passed");
        }
        Ok(outcome)
    }
}
