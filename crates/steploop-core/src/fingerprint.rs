//! SHA-256 helpers for cache keys.

use crate::types::{Step, StepExecutionFingerprint, WorktreeFingerprint};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `text`.
pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl WorktreeFingerprint {
    /// Fingerprint of the worktree from `git status --short` and `git diff HEAD`.
    ///
    /// The diff is part of the hash so that editing an already-modified file
    /// still changes the fingerprint even though its status line does not.
    pub fn from_git_output(status_short: &str, diff: &str) -> Self {
        let mut material = String::with_capacity(status_short.len() + diff.len() + 1);
        material.push_str(status_short);
        material.push('\0');
        material.push_str(diff);
        Self {
            worktree_hash: hash_text(&material),
            status_short: status_short.to_string(),
        }
    }

    /// Fingerprint used when git cannot be queried.
    pub fn unavailable() -> Self {
        Self::from_git_output("", "")
    }
}

impl StepExecutionFingerprint {
    pub fn compute(step: &Step, worktree: &WorktreeFingerprint) -> Self {
        Self {
            step_id: step.id.clone(),
            criteria_hash: hash_text(&step.success_criteria),
            worktree_hash: worktree.worktree_hash.clone(),
            files_hash: hash_text(&step.files.join("\n")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_text_is_hex_sha256() {
        assert_eq!(
            hash_text(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_text("abc").len(), 64);
    }

    #[test]
    fn diff_content_changes_worktree_hash() {
        let a = WorktreeFingerprint::from_git_output(" M src/lib.rs\n", "+one\n");
        let b = WorktreeFingerprint::from_git_output(" M src/lib.rs\n", "+two\n");
        assert_eq!(a.status_short, b.status_short);
        assert_ne!(a.worktree_hash, b.worktree_hash);
    }

    #[test]
    fn step_fingerprint_tracks_criteria_files_and_worktree() {
        let worktree = WorktreeFingerprint::from_git_output("", "");
        let step = Step::new("s1", "Title", "cargo test");
        let base = StepExecutionFingerprint::compute(&step, &worktree);
        assert_eq!(base, StepExecutionFingerprint::compute(&step, &worktree));

        let mut changed_criteria = step.clone();
        changed_criteria.success_criteria = "cargo test --all".to_string();
        assert_ne!(
            base,
            StepExecutionFingerprint::compute(&changed_criteria, &worktree)
        );

        let mut changed_files = step.clone();
        changed_files.files = vec!["src/".to_string()];
        assert_ne!(
            base,
            StepExecutionFingerprint::compute(&changed_files, &worktree)
        );

        let dirty = WorktreeFingerprint::from_git_output("?? new.rs\n", "");
        assert_ne!(base, StepExecutionFingerprint::compute(&step, &dirty));
    }

    #[test]
    fn title_does_not_affect_fingerprint() {
        let worktree = WorktreeFingerprint::unavailable();
        let step = Step::new("s1", "Title", "true");
        let mut renamed = step.clone();
        renamed.title = "Other".to_string();
        assert_eq!(
            StepExecutionFingerprint::compute(&step, &worktree),
            StepExecutionFingerprint::compute(&renamed, &worktree)
        );
    }
}
