//! Provider retries for one step iteration.
//!
//! Two independent counters: transient failures (rate limits, overloads)
//! back off exponentially and never consume a logic attempt; any other
//! failure consumes one, up to `max_logic_attempts`.

use crate::progress::ProgressSink;
use crate::provider::{ProviderAdapter, ProviderInput, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use steploop_core::events::{AttemptFailedPayload, EventPayload, RetryScheduledPayload};
use steploop_core::{classify_failure, truncate_tail, FailureKind, ProviderExecutionResult};
use tracing::{info, warn};

/// Longest failure excerpt carried in events and messages.
const MAX_REASON_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_logic_attempts: u32,
    pub transient_base: Duration,
    pub transient_cap: Duration,
    /// Multiplied by the upcoming logic attempt number.
    pub logic_backoff: Duration,
    /// `None` retries transient failures forever.
    pub max_transient_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_logic_attempts: 3,
            transient_base: Duration::from_secs(2),
            transient_cap: Duration::from_secs(120),
            logic_backoff: Duration::from_secs(2),
            max_transient_retries: None,
        }
    }
}

impl RetryPolicy {
    /// Default counts with no sleeping.
    pub fn immediate() -> Self {
        Self {
            transient_base: Duration::ZERO,
            transient_cap: Duration::ZERO,
            logic_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Config value `0` means unbounded.
    #[must_use]
    pub fn with_transient_limit(mut self, limit: u32) -> Self {
        self.max_transient_retries = (limit > 0).then_some(limit);
        self
    }

    /// Delay before transient retry number `retry` (1-based).
    pub fn transient_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.transient_base
            .saturating_mul(1 << exponent)
            .min(self.transient_cap)
    }

    /// Delay before logic attempt number `attempt`.
    pub fn logic_delay(&self, attempt: u32) -> Duration {
        self.logic_backoff.saturating_mul(attempt)
    }
}

/// What came back from the last provider call, and how we got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    pub result: ProviderExecutionResult,
    /// `None` when the last call succeeded.
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    pub logic_attempts: u32,
    pub transient_retries: u32,
    pub provider_calls: u32,
    /// Provider events across every call, keyed by kind.
    pub event_counts: BTreeMap<String, u64>,
}

impl RetryOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryingExecutor {
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Call `adapter` until it succeeds or the policy gives up.
    ///
    /// Only environment failures (the CLI cannot be started) are errors.
    pub async fn execute(
        &self,
        adapter: &dyn ProviderAdapter,
        input: &ProviderInput,
        step_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<RetryOutcome> {
        let mut logic_attempt = 1;
        let mut transient_failures = 0;
        let mut provider_calls = 0;
        let mut event_counts = BTreeMap::new();

        loop {
            provider_calls += 1;
            let result = adapter.execute(input).await?;
            for event in &result.events {
                *event_counts.entry(event.kind().to_string()).or_insert(0) += 1;
            }

            let outcome = |result: ProviderExecutionResult,
                           failure: Option<FailureKind>,
                           message: Option<String>,
                           transient_retries: u32| RetryOutcome {
                result,
                failure,
                message,
                logic_attempts: logic_attempt,
                transient_retries,
                provider_calls,
                event_counts: event_counts.clone(),
            };

            if result.ok {
                return Ok(outcome(result, None, None, transient_failures));
            }

            let text = result.failure_text();
            let kind = if result.timed_out {
                FailureKind::Generic
            } else {
                classify_failure(&text)
            };
            let reason = failure_reason(&result, &text);

            if kind == FailureKind::Transient {
                transient_failures += 1;
                if let Some(limit) = self.policy.max_transient_retries {
                    if transient_failures > limit {
                        warn!(step_id, limit, "transient retries exhausted");
                        let message = format!("transient retries exhausted after {limit}: {reason}");
                        return Ok(outcome(result, Some(kind), Some(message), limit));
                    }
                }
                let delay = self.policy.transient_delay(transient_failures);
                sink.emit(&EventPayload::RetryScheduled(RetryScheduledPayload {
                    step_id: step_id.to_string(),
                    transient_retry: transient_failures,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason,
                }));
                sleep(delay).await;
                continue;
            }

            let message = match kind {
                FailureKind::ModelUnavailable => {
                    let fallbacks = adapter.fallback_models(&input.model);
                    if fallbacks.is_empty() {
                        format!("model '{}' unavailable: {reason}", input.model)
                    } else {
                        format!(
                            "model '{}' unavailable: {reason} (fallback models: {})",
                            input.model,
                            fallbacks.join(", ")
                        )
                    }
                }
                _ => reason,
            };
            sink.emit(&EventPayload::AttemptFailed(AttemptFailedPayload {
                step_id: step_id.to_string(),
                logic_attempt,
                kind,
                message: message.clone(),
            }));

            if kind.is_terminal() || logic_attempt >= self.policy.max_logic_attempts {
                return Ok(outcome(result, Some(kind), Some(message), transient_failures));
            }

            logic_attempt += 1;
            let delay = self.policy.logic_delay(logic_attempt);
            info!(
                step_id,
                logic_attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying provider"
            );
            sleep(delay).await;
        }
    }
}

async fn sleep(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn failure_reason(result: &ProviderExecutionResult, text: &str) -> String {
    if result.timed_out {
        return "provider timed out".to_string();
    }
    let detail = truncate_tail(text.trim(), MAX_REASON_CHARS);
    match (result.exit_code, detail.is_empty()) {
        (Some(code), true) => format!("provider exited with code {code}"),
        (Some(code), false) => format!("provider exited with code {code}: {detail}"),
        (None, true) => "provider failed".to_string(),
        (None, false) => format!("provider failed: {detail}"),
    }
}
