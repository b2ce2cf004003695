//! Pre-agent criteria runs, cached by step fingerprint.

use crate::criteria::is_narrative_fallback;
use crate::shell::{Result, ShellExecutor};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use steploop_core::StepExecutionFingerprint;
use tracing::debug;

/// Outcome of running a step's criteria before the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineResult {
    pub passed: bool,
    pub output: String,
    /// Criteria are prose; nothing can be learned before the agent runs.
    pub narrative: bool,
}

impl BaselineResult {
    /// Diagnostic output worth showing the agent.
    pub fn failure_output(&self) -> Option<&str> {
        (!self.passed && !self.narrative && !self.output.trim().is_empty())
            .then_some(self.output.as_str())
    }
}

/// A baseline lookup and whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineCheck {
    pub result: BaselineResult,
    pub cached: bool,
}

/// Runs criteria before the agent call.
///
/// Criteria are assumed to be side-effect-free reads, so an unchanged
/// fingerprint always yields the stored result without touching the shell.
pub struct BaselineChecker {
    shell: Arc<dyn ShellExecutor>,
    timeout: Duration,
    cache: HashMap<StepExecutionFingerprint, BaselineResult>,
    hits: u32,
    misses: u32,
}

impl std::fmt::Debug for BaselineChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselineChecker")
            .field("timeout", &self.timeout)
            .field("cached", &self.cache.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}

impl BaselineChecker {
    pub fn new(shell: Arc<dyn ShellExecutor>, timeout: Duration) -> Self {
        Self {
            shell,
            timeout,
            cache: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Run `criteria`, or return the stored result for `fingerprint`.
    ///
    /// With `cacheable` false (the fingerprint does not reflect the worktree,
    /// e.g. git is unavailable) the cache is neither read nor written.
    pub async fn check(
        &mut self,
        criteria: &str,
        fingerprint: &StepExecutionFingerprint,
        workdir: &Path,
        cacheable: bool,
    ) -> Result<BaselineCheck> {
        if let Some(result) = self.cache.get(fingerprint).filter(|_| cacheable) {
            self.hits += 1;
            debug!(step_id = %fingerprint.step_id, "baseline cache hit");
            return Ok(BaselineCheck {
                result: result.clone(),
                cached: true,
            });
        }
        self.misses += 1;

        let shell = self.shell.run(criteria, workdir, self.timeout).await?;
        let result = if shell.success() {
            BaselineResult {
                passed: true,
                output: shell.combined(),
                narrative: false,
            }
        } else if is_narrative_fallback(&shell, criteria) {
            BaselineResult {
                passed: false,
                output: String::new(),
                narrative: true,
            }
        } else {
            BaselineResult {
                passed: false,
                output: shell.combined(),
                narrative: false,
            }
        };
        debug!(
            step_id = %fingerprint.step_id,
            passed = result.passed,
            narrative = result.narrative,
            "baseline computed"
        );
        if cacheable {
            self.cache.insert(fingerprint.clone(), result.clone());
        }
        Ok(BaselineCheck {
            result,
            cached: false,
        })
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }
}
