//! Detects agent runs that left the step's declared files untouched.

use crate::criteria::{CriteriaEvaluator, CriteriaOutcome};
use crate::git;
use crate::shell::Result;
use std::path::Path;
use steploop_core::{ProviderExecutionResult, Step};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoOpDecision {
    /// Relevant files changed, or nothing to compare against; verify normally.
    Proceed,
    /// Nothing relevant changed but the criteria already hold.
    Accept {
        changed_files: Vec<String>,
        /// Set when the criteria had to be re-run to decide.
        criteria: Option<CriteriaOutcome>,
    },
    /// Nothing relevant changed and the criteria still fail.
    Reject {
        changed_files: Vec<String>,
        criteria: CriteriaOutcome,
    },
}

/// Strip a leading `./` and trailing `*` wildcards.
fn normalize_pattern(pattern: &str) -> &str {
    let pattern = pattern.trim();
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    pattern.trim_end_matches('*')
}

/// Whether `file` falls under any of `patterns` (prefix match).
pub fn matches_any(file: &str, patterns: &[String]) -> bool {
    let file = file.strip_prefix("./").unwrap_or(file);
    patterns
        .iter()
        .any(|pattern| file.starts_with(normalize_pattern(pattern)))
}

#[derive(Debug, Clone)]
pub struct NoOpDetector {
    criteria: CriteriaEvaluator,
}

impl NoOpDetector {
    pub fn new(criteria: CriteriaEvaluator) -> Self {
        Self { criteria }
    }

    /// Decide what a successful agent run without relevant changes means.
    pub async fn evaluate(
        &self,
        step: &Step,
        baseline_passed: bool,
        result: &ProviderExecutionResult,
        workdir: &Path,
    ) -> Result<NoOpDecision> {
        if step.files.is_empty() {
            return Ok(NoOpDecision::Proceed);
        }

        let changed_files = match git::changed_files(workdir).await {
            Ok(files) => files,
            Err(err) => {
                warn!(step_id = %step.id, error = %err, "cannot list changed files; skipping no-op check");
                return Ok(NoOpDecision::Proceed);
            }
        };

        if changed_files.iter().any(|f| matches_any(f, &step.files)) {
            debug!(step_id = %step.id, changed = changed_files.len(), "relevant files changed");
            return Ok(NoOpDecision::Proceed);
        }

        if baseline_passed {
            info!(step_id = %step.id, "no relevant change; criteria already passed");
            return Ok(NoOpDecision::Accept {
                changed_files,
                criteria: None,
            });
        }

        let outcome = self
            .criteria
            .evaluate(&step.success_criteria, result, workdir)
            .await?;
        if outcome.passed {
            info!(step_id = %step.id, "no relevant change; criteria now pass");
            Ok(NoOpDecision::Accept {
                changed_files,
                criteria: Some(outcome),
            })
        } else {
            Ok(NoOpDecision::Reject {
                changed_files,
                criteria: outcome,
            })
        }
    }
}
