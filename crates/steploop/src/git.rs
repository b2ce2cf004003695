//! Git boundary.
//!
//! Every query is a `git` subprocess whose output is parsed as plain text.
//! `WorktreeFingerprinter` derives the per-iteration worktree snapshot.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use steploop_core::fingerprint::hash_bytes;
use steploop_core::WorktreeFingerprint;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("invalid utf-8 in git output")]
    InvalidUtf8,
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Number of recent commits included in the prompt.
const LOG_DEPTH: &str = "10";

async fn output(workdir: &Path, args: &[&str]) -> Result<std::process::Output> {
    Ok(Command::new("git")
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .await?)
}

async fn run_git(workdir: &Path, args: &[&str]) -> Result<String> {
    let out = output(workdir, args).await?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(GitError::CommandFailed(format!(
            "git {}: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    String::from_utf8(out.stdout).map_err(|_| GitError::InvalidUtf8)
}

/// `git log --oneline -n 10`.
pub async fn recent_log(workdir: &Path) -> Result<String> {
    run_git(workdir, &["log", "--oneline", "-n", LOG_DEPTH]).await
}

/// `git status --short`, listing every untracked file individually.
pub async fn status_short(workdir: &Path) -> Result<String> {
    run_git(workdir, &["status", "--short", "--untracked-files=all"]).await
}

/// `git diff HEAD`.
pub async fn diff_head(workdir: &Path) -> Result<String> {
    run_git(workdir, &["diff", "HEAD"]).await
}

/// Check if the working tree is clean (no uncommitted changes).
pub async fn is_working_tree_clean(workdir: &Path) -> Result<bool> {
    Ok(status_short(workdir).await?.trim().is_empty())
}

/// Files changed since the last commit, including untracked files.
pub async fn changed_files(workdir: &Path) -> Result<Vec<String>> {
    let (diff, status) = tokio::join!(
        run_git(workdir, &["diff", "--name-only", "HEAD"]),
        status_short(workdir)
    );
    let mut files: Vec<String> = diff?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect();
    for path in untracked_paths(&status?) {
        if !files.contains(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Paths of `??` entries in short status output.
pub fn untracked_paths(status: &str) -> Vec<String> {
    status
        .lines()
        .filter_map(|line| line.strip_prefix("?? "))
        .map(|p| unquote_path(p.trim()))
        .collect()
}

fn unquote_path(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

/// `git add -A`.
pub async fn stage_all(workdir: &Path) -> Result<()> {
    run_git(workdir, &["add", "-A"]).await.map(|_| ())
}

/// Whether the index differs from HEAD (`git diff --cached --quiet`).
pub async fn has_staged_changes(workdir: &Path) -> Result<bool> {
    let out = output(workdir, &["diff", "--cached", "--quiet"]).await?;
    match out.status.code() {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        _ => Err(GitError::CommandFailed(format!(
            "git diff --cached --quiet: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ))),
    }
}

/// `git commit -m <message>`.
pub async fn commit(workdir: &Path, message: &str) -> Result<()> {
    run_git(workdir, &["commit", "-m", message]).await.map(|_| ())
}

/// Live git state for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSnapshot {
    pub fingerprint: WorktreeFingerprint,
    /// Human-readable log + status for the prompt.
    pub state_text: String,
    pub available: bool,
}

/// Derives worktree fingerprints from read-only git queries.
#[derive(Debug, Clone)]
pub struct WorktreeFingerprinter {
    workdir: PathBuf,
}

impl WorktreeFingerprinter {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Query log, status and diff concurrently and fingerprint the result.
    ///
    /// A repository without commits has no log or `HEAD` diff; only a failing
    /// status marks git as unavailable.
    pub async fn snapshot(&self) -> GitSnapshot {
        let (log, status, diff) = tokio::join!(
            recent_log(&self.workdir),
            status_short(&self.workdir),
            diff_head(&self.workdir)
        );

        let status = match status {
            Ok(status) => status,
            Err(err) => {
                warn!(workdir = %self.workdir.display(), error = %err, "git state unavailable");
                return GitSnapshot {
                    fingerprint: WorktreeFingerprint::unavailable(),
                    state_text: "Git state unavailable.".to_string(),
                    available: false,
                };
            }
        };
        let log = log.unwrap_or_else(|err| {
            debug!(error = %err, "git log failed");
            String::new()
        });
        let mut material = diff.unwrap_or_else(|err| {
            debug!(error = %err, "git diff HEAD failed");
            String::new()
        });

        // Untracked files are absent from `git diff HEAD`; hash their content
        // so edits to them still move the fingerprint.
        for path in untracked_paths(&status) {
            material.push_str(&format!(
                "\n?? {path} {}",
                digest_file(&self.workdir.join(&path)).await
            ));
        }

        let state_text = format!(
            "Recent commits:\n{}\n\nWorking tree status:\n{}",
            non_empty_or(log.trim_end(), "(no commits)"),
            non_empty_or(status.trim_end(), "(clean)")
        );

        GitSnapshot {
            fingerprint: WorktreeFingerprint::from_git_output(&status, &material),
            state_text,
            available: true,
        }
    }
}

fn non_empty_or<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    if text.is_empty() {
        fallback
    } else {
        text
    }
}

/// Content digest of a file, or a marker when it cannot be read.
async fn digest_file(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => hash_bytes(&bytes),
        Err(_) => "unreadable".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Create a test git repository with one commit.
    pub(crate) fn setup_test_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for args in [
            &["init"][..],
            &["config", "user.email", "test@test.com"],
            &["config", "user.name", "Test"],
        ] {
            std::process::Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "# Test").unwrap();
        for args in [&["add", "."][..], &["commit", "-m", "Initial commit"]] {
            std::process::Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_is_working_tree_clean() {
        let dir = setup_test_repo();
        assert!(is_working_tree_clean(dir.path()).await.unwrap());

        std::fs::write(dir.path().join("untracked.txt"), "data").unwrap();
        assert!(!is_working_tree_clean(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_changed_files_includes_untracked() {
        let dir = setup_test_repo();
        std::fs::write(dir.path().join("README.md"), "# Changed").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/new.rs"), "fn main() {}").unwrap();

        let files = changed_files(dir.path()).await.unwrap();
        assert_eq!(files, vec!["README.md".to_string(), "src/new.rs".to_string()]);
    }

    #[tokio::test]
    async fn test_stage_and_commit() {
        let dir = setup_test_repo();
        stage_all(dir.path()).await.unwrap();
        assert!(!has_staged_changes(dir.path()).await.unwrap());

        std::fs::write(dir.path().join("feature.txt"), "feature").unwrap();
        stage_all(dir.path()).await.unwrap();
        assert!(has_staged_changes(dir.path()).await.unwrap());

        commit(dir.path(), "s1: add feature").await.unwrap();
        assert!(is_working_tree_clean(dir.path()).await.unwrap());
        let log = recent_log(dir.path()).await.unwrap();
        assert!(log.lines().next().unwrap().ends_with("s1: add feature"));
    }

    #[tokio::test]
    async fn test_snapshot_tracks_content_changes() {
        let dir = setup_test_repo();
        let fingerprinter = WorktreeFingerprinter::new(dir.path());

        let clean = fingerprinter.snapshot().await;
        assert!(clean.available);
        assert!(clean.state_text.contains("Initial commit"));
        assert!(clean.state_text.contains("(clean)"));
        assert_eq!(clean, fingerprinter.snapshot().await);

        std::fs::write(dir.path().join("README.md"), "# One").unwrap();
        let first = fingerprinter.snapshot().await;
        std::fs::write(dir.path().join("README.md"), "# Two").unwrap();
        let second = fingerprinter.snapshot().await;
        assert_eq!(first.fingerprint.status_short, second.fingerprint.status_short);
        assert_ne!(first.fingerprint.worktree_hash, second.fingerprint.worktree_hash);

        std::fs::write(dir.path().join("notes.txt"), "a").unwrap();
        let untracked_a = fingerprinter.snapshot().await;
        std::fs::write(dir.path().join("notes.txt"), "b").unwrap();
        let untracked_b = fingerprinter.snapshot().await;
        assert_ne!(
            untracked_a.fingerprint.worktree_hash,
            untracked_b.fingerprint.worktree_hash
        );
    }

    #[tokio::test]
    async fn test_snapshot_outside_repo_degrades() {
        let dir = TempDir::new().unwrap();
        let snapshot = WorktreeFingerprinter::new(dir.path()).snapshot().await;
        assert!(!snapshot.available);
        assert_eq!(snapshot.fingerprint, WorktreeFingerprint::unavailable());
        assert!(snapshot.state_text.contains("unavailable"));
    }

    #[test]
    fn test_untracked_paths() {
        let status = " M src/lib.rs\n?? new.txt\n?? \"with space.txt\"\nA  added.rs\n";
        assert_eq!(
            untracked_paths(status),
            vec!["new.txt".to_string(), "with space.txt".to_string()]
        );
    }
}
