//! Core types for plan execution.
//!
//! The plan document types serialize with camelCase field names so the
//! on-disk JSON matches what the planner writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current plan document schema version.
pub const PLAN_SCHEMA_VERSION: u32 = 2;

// --- Enumerations ---

/// Step lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    #[serde(alias = "running")]
    InProgress,
    #[serde(alias = "completed")]
    Done,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory risk rating assigned by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// --- Plan document ---

/// Run-level metadata stored alongside the steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    /// Provider id the plan was authored for (e.g., `claude`).
    pub provider: String,
    /// Model requested for the agent.
    pub model: String,
    /// Iteration budget of the most recent run.
    pub total_iterations: u32,
    /// Iterations executed across all runs of this plan.
    pub completed_iterations: u32,
    /// Latest provider session id, if the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
}

impl Default for PlanMetadata {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            model: String::new(),
            total_iterations: 0,
            completed_iterations: 0,
            resume_session_id: None,
        }
    }
}

/// A single unit of work with its own verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Shell command, or narrative text evaluated against the agent result.
    pub success_criteria: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Advisory path patterns the step is expected to touch.
    pub files: Vec<String>,
    pub risk_level: RiskLevel,
    pub owner: String,
    /// Verification commands run in order after the criteria pass.
    pub post_checks: Vec<String>,
    pub rollback_hint: String,
}

impl Step {
    /// Create a pending step with default bookkeeping fields.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        success_criteria: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            success_criteria: success_criteria.into(),
            status: StepStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            files: Vec::new(),
            risk_level: RiskLevel::Medium,
            owner: "agent".to_string(),
            post_checks: Vec::new(),
            rollback_hint: String::new(),
        }
    }

    /// Whether the scheduler may pick this step.
    ///
    /// `in_progress` means a previous run crashed mid-iteration and is treated
    /// like `pending`. A `failed` step becomes runnable again when its attempt
    /// budget was raised after the fact.
    pub fn is_runnable(&self) -> bool {
        match self.status {
            StepStatus::Pending | StepStatus::InProgress => true,
            StepStatus::Failed => self.attempts < self.max_attempts,
            StepStatus::Done => false,
        }
    }
}

/// The plan document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub schema_version: u32,
    pub goal: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Steps in execution priority order.
    pub steps: Vec<Step>,
    pub metadata: PlanMetadata,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            schema_version: PLAN_SCHEMA_VERSION,
            goal: goal.into(),
            created_at: Utc::now(),
            system_prompt: None,
            steps,
            metadata: PlanMetadata::default(),
        }
    }

    /// Index of the earliest runnable step.
    pub fn next_runnable(&self) -> Option<usize> {
        self.steps.iter().position(Step::is_runnable)
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

// --- Fingerprints ---

/// Snapshot of the live git state; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeFingerprint {
    pub worktree_hash: String,
    pub status_short: String,
}

/// Cache key for per-step verification results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionFingerprint {
    pub step_id: String,
    pub criteria_hash: String,
    pub worktree_hash: String,
    pub files_hash: String,
}

// --- Provider results ---

/// Structured event emitted by an agent CLI while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Thinking {
        text: String,
    },
    ToolCall {
        name: String,
        input: String,
    },
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        output: String,
        #[serde(rename = "isError")]
        is_error: bool,
    },
    Error {
        message: String,
    },
    AssistantText {
        text: String,
    },
    Status {
        message: String,
    },
}

impl ProviderEvent {
    /// Event kind name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::AssistantText { .. } => "assistant_text",
            Self::Status { .. } => "status",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Outcome of one provider invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderExecutionResult {
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    /// Final assistant message as reported by the provider.
    pub final_text: String,
    pub events: Vec<ProviderEvent>,
    pub session_id: Option<String>,
    pub used_model: String,
}

impl ProviderExecutionResult {
    /// Assistant text: the final message, or the concatenated text events.
    pub fn assistant_text(&self) -> String {
        if !self.final_text.trim().is_empty() {
            return self.final_text.clone();
        }
        self.events
            .iter()
            .filter_map(|e| match e {
                ProviderEvent::AssistantText { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn count_events(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    /// Text used to classify a failed attempt.
    ///
    /// stderr and error events carry the provider's own diagnostics; the
    /// stdout tail is only consulted when neither has anything to say.
    pub fn failure_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.stderr.trim().is_empty() {
            parts.push(self.stderr.trim());
        }
        for event in &self.events {
            if let ProviderEvent::Error { message } = event {
                parts.push(message.as_str());
            }
        }
        if parts.is_empty() {
            let tail_start = floor_char_boundary(&self.stdout, self.stdout.len().saturating_sub(2000));
            return self.stdout[tail_start..].to_string();
        }
        parts.join("\n")
    }
}

/// Largest char boundary at or below `index`.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Keep at most `max_chars` trailing characters of `s`, marking the cut.
pub fn truncate_tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    let skip = count - max_chars;
    let tail: String = s.chars().skip(skip).collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StepStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(serde_json::to_string(&StepStatus::Done).unwrap(), "\"done\"");
    }

    #[test]
    fn step_status_accepts_legacy_spellings() {
        let done: StepStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(done, StepStatus::Done);
        let running: StepStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(running, StepStatus::InProgress);
    }

    #[test]
    fn in_progress_step_is_runnable() {
        let mut step = Step::new("s1", "Title", "true");
        step.status = StepStatus::InProgress;
        assert!(step.is_runnable());
    }

    #[test]
    fn failed_step_runnable_only_with_budget_left() {
        let mut step = Step::new("s1", "Title", "true");
        step.status = StepStatus::Failed;
        step.attempts = 3;
        step.max_attempts = 3;
        assert!(!step.is_runnable());
        step.max_attempts = 5;
        assert!(step.is_runnable());
    }

    #[test]
    fn next_runnable_skips_done_steps() {
        let mut first = Step::new("a", "A", "true");
        first.status = StepStatus::Done;
        let second = Step::new("b", "B", "true");
        let plan = Plan::new("goal", vec![first, second]);
        assert_eq!(plan.next_runnable(), Some(1));
    }

    #[test]
    fn provider_event_uses_type_tag() {
        let event = ProviderEvent::ToolCall {
            name: "Bash".to_string(),
            input: "ls".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"tool_call\""));
        assert_eq!(event.kind(), "tool_call");
    }

    #[test]
    fn assistant_text_falls_back_to_events() {
        let result = ProviderExecutionResult {
            events: vec![
                ProviderEvent::AssistantText {
                    text: "first".to_string(),
                },
                ProviderEvent::Status {
                    message: "x".to_string(),
                },
                ProviderEvent::AssistantText {
                    text: "second".to_string(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(result.assistant_text(), "first\nsecond");
    }

    #[test]
    fn failure_text_prefers_stderr_and_error_events() {
        let result = ProviderExecutionResult {
            stdout: "the agent wrote about rate limits".to_string(),
            stderr: "boom".to_string(),
            events: vec![ProviderEvent::Error {
                message: "503".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(result.failure_text(), "boom\n503");
    }

    #[test]
    fn failure_text_falls_back_to_stdout() {
        let result = ProviderExecutionResult {
            stdout: "429 Too Many Requests".to_string(),
            ..Default::default()
        };
        assert_eq!(result.failure_text(), "429 Too Many Requests");
    }

    #[test]
    fn truncate_tail_keeps_end() {
        assert_eq!(truncate_tail("abcdef", 10), "abcdef");
        assert_eq!(truncate_tail("abcdef", 3), "...def");
        assert_eq!(truncate_tail("héllo wörld", 5), "...wörld");
    }
}
