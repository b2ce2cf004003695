//! Auto-commit of completed steps.

use crate::git::{self, Result};
use std::path::Path;
use steploop_core::Step;
use tracing::{debug, info, warn};

/// Whether completed steps get committed this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitGate {
    Enabled,
    Disabled { reason: String },
}

impl CommitGate {
    /// Decide once, before the first iteration.
    ///
    /// Any doubt about the worktree disables committing: an agent's changes
    /// must never be mixed into a commit with the operator's.
    pub async fn resolve(requested: bool, dry_run: bool, allow_dirty: bool, workdir: &Path) -> Self {
        if !requested {
            return Self::disabled("auto-commit not requested");
        }
        if dry_run {
            return Self::disabled("dry run");
        }
        match git::is_working_tree_clean(workdir).await {
            Err(err) => {
                warn!(error = %err, "cannot read worktree status; auto-commit disabled");
                Self::disabled("worktree status unavailable")
            }
            Ok(false) if !allow_dirty => {
                warn!("worktree has uncommitted changes; auto-commit disabled (use --allow-dirty)");
                Self::disabled("worktree dirty")
            }
            Ok(_) => {
                debug!("auto-commit enabled");
                Self::Enabled
            }
        }
    }

    fn disabled(reason: &str) -> Self {
        Self::Disabled {
            reason: reason.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

pub fn commit_message(step: &Step) -> String {
    format!("{}: {}", step.id, step.title)
}

/// Stage everything and commit. `None` when there was nothing to commit.
pub async fn commit_step(workdir: &Path, step: &Step) -> Result<Option<String>> {
    git::stage_all(workdir).await?;
    if !git::has_staged_changes(workdir).await? {
        debug!(step_id = %step.id, "nothing staged; skipping commit");
        return Ok(None);
    }
    let message = commit_message(step);
    git::commit(workdir, &message).await?;
    info!(step_id = %step.id, message = %message, "committed step");
    Ok(Some(message))
}
