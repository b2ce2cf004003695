//! Narrative success criteria.
//!
//! Some planners write criteria as prose ("produce a lengthy answer and trigger
//! a tool call") instead of a shell command. When the shell cannot run such
//! text, it is judged with fixed structural checks against the agent result.

use crate::types::ProviderExecutionResult;
use std::fmt::Write as _;
use std::path::Path;

const SHELL_METACHARACTERS: &[char] = &['|', '&', ';', '<', '>', '$', '`', '\\', '{', '}', '[', ']'];

const MIN_NARRATIVE_WORDS: usize = 5;

const LENGTH_WORDS: &[&str] = &[
    "long",
    "longer",
    "lengthy",
    "length",
    "detailed",
    "detail",
    "verbose",
    "complex",
    "complexity",
    "elaborate",
    "thorough",
    "comprehensive",
    "paragraph",
    "paragraphs",
];

const STREAM_WORDS: &[&str] = &["stream", "streams", "streamed", "streaming"];

const MIN_LONG_WORDS: usize = 20;
const MIN_LONG_CHARS: usize = 160;

/// Abbreviations that look like `name.ext` but are not files.
const NOT_FILENAMES: &[&str] = &["e.g", "i.e", "etc", "vs", "a.m", "p.m"];

/// Whether `text` reads as prose rather than a shell command.
pub fn looks_like_narrative(text: &str) -> bool {
    let text = text.trim();
    if text.contains(SHELL_METACHARACTERS) || text.contains('/') {
        return false;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < MIN_NARRATIVE_WORDS {
        return false;
    }
    !words.iter().any(|w| is_flag_token(w))
}

fn is_flag_token(word: &str) -> bool {
    let rest = word
        .strip_prefix("--")
        .or_else(|| word.strip_prefix('-'));
    rest.and_then(|r| r.chars().next())
        .is_some_and(char::is_alphabetic)
}

/// One structural check and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Result of evaluating narrative criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeReport {
    pub passed: bool,
    pub checks: Vec<NarrativeCheck>,
}

impl NarrativeReport {
    /// One `PASS`/`FAIL` line per check.
    pub fn output(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            let verdict = if check.passed { "PASS" } else { "FAIL" };
            let _ = writeln!(out, "{verdict}: {} ({})", check.name, check.detail);
        }
        out
    }

    /// Names of the checks that failed.
    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Evaluate prose criteria against an agent result.
///
/// Every applicable check must pass. Filenames are resolved against `workdir`.
pub fn evaluate_narrative(
    criteria: &str,
    result: &ProviderExecutionResult,
    workdir: &Path,
) -> NarrativeReport {
    let lower = criteria.to_lowercase();
    let normalized = lower.replace(['_', '-'], " ");
    let text = result.assistant_text();
    let mut checks = Vec::new();

    checks.push(NarrativeCheck {
        name: "non-empty output".to_string(),
        passed: !text.trim().is_empty(),
        detail: format!("{} chars of assistant text", text.trim().chars().count()),
    });

    if normalized.contains("tool call") {
        let count = result.count_events("tool_call");
        checks.push(NarrativeCheck {
            name: "tool_call event".to_string(),
            passed: count >= 1,
            detail: format!("{count} tool_call events"),
        });
    }

    if normalized.contains("tool result") {
        let count = result.count_events("tool_result");
        checks.push(NarrativeCheck {
            name: "tool_result event".to_string(),
            passed: count >= 1,
            detail: format!("{count} tool_result events"),
        });
    }

    let tokens: Vec<String> = criteria
        .split_whitespace()
        .map(|w| trim_token(w).to_lowercase())
        .collect();

    if tokens.iter().any(|t| STREAM_WORDS.contains(&t.as_str())) {
        let count = result.events.iter().filter(|e| !e.is_error()).count();
        checks.push(NarrativeCheck {
            name: "streamed events".to_string(),
            passed: count >= 1,
            detail: format!("{count} non-error events"),
        });
    }

    if tokens.iter().any(|t| LENGTH_WORDS.contains(&t.as_str())) {
        let words = text.split_whitespace().count();
        let chars = text.chars().count();
        checks.push(NarrativeCheck {
            name: "output length".to_string(),
            passed: words >= MIN_LONG_WORDS || chars >= MIN_LONG_CHARS,
            detail: format!("{words} words, {chars} chars"),
        });
    }

    for word in criteria.split_whitespace() {
        let token = trim_token(word);
        if is_filename_token(token) {
            let exists = workdir.join(token).exists();
            checks.push(NarrativeCheck {
                name: format!("file {token} exists"),
                passed: exists,
                detail: if exists { "found" } else { "missing" }.to_string(),
            });
        }
    }

    let passed = checks.iter().all(|c| c.passed);
    NarrativeReport { passed, checks }
}

fn trim_token(word: &str) -> &str {
    word.trim_matches(|c: char| {
        matches!(
            c,
            '"' | '\'' | '(' | ')' | ',' | ':' | '!' | '?' | '.'
        )
    })
}

fn is_filename_token(token: &str) -> bool {
    if NOT_FILENAMES.contains(&token.to_lowercase().as_str()) {
        return false;
    }
    let Some((stem, ext)) = token.rsplit_once('.') else {
        return false;
    };
    (!stem.is_empty() || token.starts_with('.'))
        && !ext.is_empty()
        && ext.chars().all(char::is_alphanumeric)
        && ext.chars().any(char::is_alphabetic)
}
