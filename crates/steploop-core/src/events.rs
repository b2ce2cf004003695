//! Event types for the run log.
//!
//! Each payload variant carries its own strongly-typed struct. Serialized as
//! `{"event": "<name>", "payload": {...}}` so a run-log line stays flat.

use crate::analytics::LoopAnalytics;
use crate::classify::FailureKind;
use crate::types::{ProviderEvent, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    IterationStarted,
    ProviderEvent,
    RetryScheduled,
    AttemptFailed,
    NoopRejected,
    StepDone,
    StepFailed,
    PostCheckFailed,
    CommitCreated,
    DryRun,
    RunFinished,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::IterationStarted => "iteration_started",
            Self::ProviderEvent => "provider_event",
            Self::RetryScheduled => "retry_scheduled",
            Self::AttemptFailed => "attempt_failed",
            Self::NoopRejected => "noop_rejected",
            Self::StepDone => "step_done",
            Self::StepFailed => "step_failed",
            Self::PostCheckFailed => "post_check_failed",
            Self::CommitCreated => "commit_created",
            Self::DryRun => "dry_run",
            Self::RunFinished => "run_finished",
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every step is done or out of attempts.
    NoRunnableSteps,
    IterationBudgetExhausted,
    DryRun,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRunnableSteps => "no_runnable_steps",
            Self::IterationBudgetExhausted => "iteration_budget_exhausted",
            Self::DryRun => "dry_run",
        }
    }
}

/// Payload for run_started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStartedPayload {
    pub run_id: String,
    pub plan_path: String,
    pub provider: String,
    pub model: String,
    pub iterations: u32,
    pub dry_run: bool,
}

/// Payload for iteration_started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationStartedPayload {
    pub iteration: u32,
    pub step_id: String,
    /// 1-based attempt number this iteration would consume.
    pub attempt: u32,
    pub max_attempts: u32,
    pub baseline_passed: bool,
    pub baseline_cached: bool,
}

/// Payload for provider_event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEventPayload {
    pub step_id: String,
    pub event: ProviderEvent,
}

/// Payload for retry_scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryScheduledPayload {
    pub step_id: String,
    pub transient_retry: u32,
    pub delay_ms: u64,
    pub reason: String,
}

/// Payload for attempt_failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailedPayload {
    pub step_id: String,
    pub logic_attempt: u32,
    pub kind: FailureKind,
    pub message: String,
}

/// Payload for noop_rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoopRejectedPayload {
    pub step_id: String,
    pub changed_files: Vec<String>,
}

/// Payload for step_done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDonePayload {
    pub step_id: String,
    pub attempts: u32,
    /// Completed without a relevant file change.
    pub noop_accepted: bool,
}

/// Payload for step_failed.
///
/// Emitted for every iteration that consumed an attempt; `status` tells
/// whether the step will be retried (`pending`) or is exhausted (`failed`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailedPayload {
    pub step_id: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: StepStatus,
    pub reason: String,
}

/// Payload for post_check_failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCheckFailedPayload {
    pub step_id: String,
    pub command: String,
    pub exit_code: Option<i32>,
}

/// Payload for commit_created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCreatedPayload {
    pub step_id: String,
    pub message: String,
}

/// Payload for dry_run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunPayload {
    pub step_id: String,
    pub command: String,
}

/// Payload for run_finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFinishedPayload {
    pub run_id: String,
    pub stop_reason: StopReason,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub pending_steps: usize,
    pub analytics: LoopAnalytics,
}

/// Union type for all event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    RunStarted(RunStartedPayload),
    IterationStarted(IterationStartedPayload),
    ProviderEvent(ProviderEventPayload),
    RetryScheduled(RetryScheduledPayload),
    AttemptFailed(AttemptFailedPayload),
    NoopRejected(NoopRejectedPayload),
    StepDone(StepDonePayload),
    StepFailed(StepFailedPayload),
    PostCheckFailed(PostCheckFailedPayload),
    CommitCreated(CommitCreatedPayload),
    DryRun(DryRunPayload),
    RunFinished(RunFinishedPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::RunStarted(_) => EventType::RunStarted,
            Self::IterationStarted(_) => EventType::IterationStarted,
            Self::ProviderEvent(_) => EventType::ProviderEvent,
            Self::RetryScheduled(_) => EventType::RetryScheduled,
            Self::AttemptFailed(_) => EventType::AttemptFailed,
            Self::NoopRejected(_) => EventType::NoopRejected,
            Self::StepDone(_) => EventType::StepDone,
            Self::StepFailed(_) => EventType::StepFailed,
            Self::PostCheckFailed(_) => EventType::PostCheckFailed,
            Self::CommitCreated(_) => EventType::CommitCreated,
            Self::DryRun(_) => EventType::DryRun,
            Self::RunFinished(_) => EventType::RunFinished,
        }
    }

    /// Step the event refers to, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::IterationStarted(p) => Some(&p.step_id),
            Self::ProviderEvent(p) => Some(&p.step_id),
            Self::RetryScheduled(p) => Some(&p.step_id),
            Self::AttemptFailed(p) => Some(&p.step_id),
            Self::NoopRejected(p) => Some(&p.step_id),
            Self::StepDone(p) => Some(&p.step_id),
            Self::StepFailed(p) => Some(&p.step_id),
            Self::PostCheckFailed(p) => Some(&p.step_id),
            Self::CommitCreated(p) => Some(&p.step_id),
            Self::DryRun(p) => Some(&p.step_id),
            Self::RunStarted(_) | Self::RunFinished(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One line of the JSONL run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLogRecord {
    pub id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}
