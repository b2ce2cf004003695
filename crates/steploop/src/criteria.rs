//! Success-criteria evaluation after the agent runs.

use crate::shell::{Result, ShellExecutor, ShellOutput};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use steploop_core::narrative::{evaluate_narrative, looks_like_narrative};
use steploop_core::ProviderExecutionResult;
use tracing::{debug, info};

/// How the criteria were judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriteriaMode {
    Shell,
    Narrative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriteriaOutcome {
    pub passed: bool,
    /// Command output, or one PASS/FAIL line per narrative check.
    pub output: String,
    pub mode: CriteriaMode,
    pub duration: Duration,
}

/// The shell rejected `criteria` as a program and the text reads as prose.
pub fn is_narrative_fallback(shell: &ShellOutput, criteria: &str) -> bool {
    !shell.success() && shell.command_not_found() && looks_like_narrative(criteria)
}

#[derive(Clone)]
pub struct CriteriaEvaluator {
    shell: Arc<dyn ShellExecutor>,
    timeout: Duration,
}

impl std::fmt::Debug for CriteriaEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriteriaEvaluator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CriteriaEvaluator {
    pub fn new(shell: Arc<dyn ShellExecutor>, timeout: Duration) -> Self {
        Self { shell, timeout }
    }

    /// Run `criteria` as a shell command; pass iff it exits 0.
    ///
    /// Prose that the shell cannot execute is judged by structural checks
    /// against `result` instead.
    pub async fn evaluate(
        &self,
        criteria: &str,
        result: &ProviderExecutionResult,
        workdir: &Path,
    ) -> Result<CriteriaOutcome> {
        let started = Instant::now();
        let shell = self.shell.run(criteria, workdir, self.timeout).await?;

        if is_narrative_fallback(&shell, criteria) {
            let report = evaluate_narrative(criteria, result, workdir);
            info!(
                passed = report.passed,
                checks = report.checks.len(),
                "evaluated narrative criteria"
            );
            return Ok(CriteriaOutcome {
                passed: report.passed,
                output: report.output(),
                mode: CriteriaMode::Narrative,
                duration: started.elapsed(),
            });
        }

        let passed = shell.success();
        let output = if shell.timed_out {
            format!("criteria timed out after {}s", self.timeout.as_secs())
        } else {
            shell.combined()
        };
        debug!(passed, exit_code = ?shell.exit_code, "evaluated shell criteria");
        Ok(CriteriaOutcome {
            passed,
            output,
            mode: CriteriaMode::Shell,
            duration: started.elapsed(),
        })
    }
}
