//! Provider failure classification.
//!
//! All string matching against provider diagnostics lives here. Adding a new
//! provider error string means adding a row to one of the tables below.

use serde::{Deserialize, Serialize};

/// Class of a failed provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream infrastructure trouble; retried without consuming attempts.
    Transient,
    /// The requested model does not exist or is not enabled.
    ModelUnavailable,
    /// The thinking/budget/turn configuration was refused.
    ThinkingConfigRejected,
    /// Anything else: the agent itself failed.
    Generic,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::ModelUnavailable => "model_unavailable",
            Self::ThinkingConfigRejected => "thinking_config_rejected",
            Self::Generic => "generic",
        }
    }

    /// Retrying with the same inputs cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ModelUnavailable | Self::ThinkingConfigRejected)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signature matches when every fragment occurs in the lowercased text.
pub type Signature = &'static [&'static str];

/// HTTP status codes that mark a transient failure. Matched as whole numbers.
pub const TRANSIENT_STATUS_CODES: &[&str] = &["429", "502", "503", "529"];

pub const TRANSIENT_SIGNATURES: &[Signature] = &[
    &["rate limit"],
    &["rate_limit"],
    &["ratelimit"],
    &["too many requests"],
    &["capacity"],
    &["overloaded"],
    &["service unavailable"],
    &["resource exhausted"],
    &["resource_exhausted"],
    &["econnreset"],
    &["socket hang up"],
    &["connection reset"],
    &["socket timeout"],
    &["etimedout"],
    &["connection timed out"],
    &["request timed out"],
    &["blocked"],
];

pub const MODEL_UNAVAILABLE_SIGNATURES: &[Signature] = &[
    &["unknown model"],
    &["model not found"],
    &["model_not_found"],
    &["unsupported model"],
    &["invalid model"],
    &["model is not available"],
    &["model", "does not exist"],
];

/// Configuration knobs a provider may refuse.
pub const THINKING_KEYWORDS: &[&str] = &[
    "thinking",
    "budget",
    "reasoning effort",
    "reasoning_effort",
    "max turns",
    "max_turns",
    "max-turns",
];

pub const REJECTION_KEYWORDS: &[&str] = &[
    "not supported",
    "unsupported",
    "invalid",
    "rejected",
    "unknown",
    "not allowed",
];

/// Classify the diagnostic text of a failed provider attempt.
///
/// Transient signatures win over terminal ones: a rate-limited request that
/// also echoes the model name must still be retried.
pub fn classify_failure(text: &str) -> FailureKind {
    let lower = text.to_lowercase();

    if contains_status_code(&lower) || matches_any(&lower, TRANSIENT_SIGNATURES) {
        return FailureKind::Transient;
    }
    if matches_any(&lower, MODEL_UNAVAILABLE_SIGNATURES) {
        return FailureKind::ModelUnavailable;
    }
    if THINKING_KEYWORDS.iter().any(|k| lower.contains(k))
        && REJECTION_KEYWORDS.iter().any(|k| lower.contains(k))
    {
        return FailureKind::ThinkingConfigRejected;
    }
    FailureKind::Generic
}

fn matches_any(lower: &str, signatures: &[Signature]) -> bool {
    signatures
        .iter()
        .any(|fragments| fragments.iter().all(|f| lower.contains(f)))
}

fn contains_status_code(lower: &str) -> bool {
    TRANSIENT_STATUS_CODES.iter().any(|code| {
        lower.match_indices(code).any(|(start, _)| {
            let before = lower[..start].chars().next_back();
            let after = lower[start + code.len()..].chars().next();
            !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
        })
    })
}
