//! Step scheduler.
//!
//! Drives a plan one iteration at a time: pick the earliest runnable step,
//! prepare baseline and prompt, run the agent with retries, verify, persist.
//! Steps never run concurrently because they share one worktree.

use crate::baseline::BaselineChecker;
use crate::commit::{commit_step, CommitGate};
use crate::criteria::CriteriaEvaluator;
use crate::git::WorktreeFingerprinter;
use crate::noop::{NoOpDecision, NoOpDetector};
use crate::post_check::PostCheckRunner;
use crate::progress::{FanoutSink, JsonlRunLog, ProgressSink, TracingSink};
use crate::provider::{ProviderAdapter, ProviderError, ProviderInput};
use crate::retry::{RetryPolicy, RetryingExecutor};
use crate::shell::{BashShell, ShellError, ShellExecutor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use steploop_core::events::{
    CommitCreatedPayload, DryRunPayload, EventPayload, IterationStartedPayload,
    NoopRejectedPayload, PostCheckFailedPayload, ProviderEventPayload, RunFinishedPayload,
    RunStartedPayload, StepDonePayload, StepFailedPayload, StopReason,
};
use steploop_core::prompt::{DefaultPromptBuilder, PromptBuilder, PromptContext};
use steploop_core::{
    truncate_tail, Config, FailureKind, LoopAnalytics, Plan, PlanError, PlanStore,
    ProviderEvent, ProviderExecutionResult, Step, StepExecutionFingerprint, StepStatus,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest `lastError` persisted on a step.
pub const MAX_LAST_ERROR_CHARS: usize = 2000;

/// Failures that abort a run. Everything the agent can get wrong is recorded
/// on the step instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Shell(#[from] ShellError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub iterations: u32,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub pending_steps: usize,
    pub stop_reason: StopReason,
    pub analytics: LoopAnalytics,
}

/// Collaborators and counters that live for one `run`.
struct RunState {
    fingerprinter: WorktreeFingerprinter,
    baseline: BaselineChecker,
    criteria: CriteriaEvaluator,
    noop: NoOpDetector,
    post_checks: PostCheckRunner,
    commit_gate: CommitGate,
    analytics: LoopAnalytics,
    model: String,
}

pub struct StepScheduler {
    store: PlanStore,
    workdir: PathBuf,
    provider: Arc<dyn ProviderAdapter>,
    shell: Arc<dyn ShellExecutor>,
    prompt_builder: Arc<dyn PromptBuilder>,
    sink: Arc<dyn ProgressSink>,
    retry: RetryingExecutor,
    config: Config,
    run_id: String,
}

impl std::fmt::Debug for StepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepScheduler")
            .field("plan", &self.store.path())
            .field("workdir", &self.workdir)
            .field("provider", &self.provider.id())
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

fn secs(value: u32) -> Duration {
    Duration::from_secs(u64::from(value))
}

/// `headline` followed by as much of the tail of `detail` as fits the
/// `lastError` bound.
fn failure_message(headline: &str, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        return headline.to_string();
    }
    let room = MAX_LAST_ERROR_CHARS.saturating_sub(headline.chars().count() + 1);
    format!("{headline}\n{}", truncate_tail(detail, room))
}

impl StepScheduler {
    pub fn new(
        store: PlanStore,
        workdir: impl Into<PathBuf>,
        provider: Arc<dyn ProviderAdapter>,
        config: Config,
    ) -> Self {
        let retry = RetryingExecutor::new(
            RetryPolicy::default().with_transient_limit(config.max_transient_retries),
        );
        Self {
            store,
            workdir: workdir.into(),
            provider,
            shell: Arc::new(BashShell),
            prompt_builder: Arc::new(DefaultPromptBuilder),
            sink: Arc::new(TracingSink),
            retry,
            config,
            run_id: uuid::Uuid::now_v7().to_string(),
        }
    }

    #[must_use]
    pub fn with_shell(mut self, shell: Arc<dyn ShellExecutor>) -> Self {
        self.shell = shell;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryingExecutor::new(policy);
        self
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Also write every event to `<dir>/run-<run_id>.jsonl`.
    pub fn open_run_log(&mut self, dir: &Path) -> Result<PathBuf> {
        let log = JsonlRunLog::create(dir, &self.run_id)?;
        let path = log.path().to_path_buf();
        self.sink = Arc::new(FanoutSink::new(vec![
            Arc::clone(&self.sink),
            Arc::new(log),
        ]));
        Ok(path)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run iterations until the budget is spent or no step is runnable.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut plan = self.store.load()?;
        let model = if self.config.model.is_empty() {
            plan.metadata.model.clone()
        } else {
            self.config.model.clone()
        };

        let criteria = CriteriaEvaluator::new(
            Arc::clone(&self.shell),
            secs(self.config.criteria_timeout_sec),
        );
        let mut state = RunState {
            fingerprinter: WorktreeFingerprinter::new(&self.workdir),
            baseline: BaselineChecker::new(
                Arc::clone(&self.shell),
                secs(self.config.criteria_timeout_sec),
            ),
            noop: NoOpDetector::new(criteria.clone()),
            criteria,
            post_checks: PostCheckRunner::new(
                Arc::clone(&self.shell),
                secs(self.config.post_check_timeout_sec),
            ),
            commit_gate: CommitGate::resolve(
                self.config.auto_commit,
                self.config.dry_run,
                self.config.allow_dirty,
                &self.workdir,
            )
            .await,
            analytics: LoopAnalytics::default(),
            model,
        };

        self.sink.emit(&EventPayload::RunStarted(RunStartedPayload {
            run_id: self.run_id.clone(),
            plan_path: self.store.path().display().to_string(),
            provider: self.provider.id().to_string(),
            model: state.model.clone(),
            iterations: self.config.iterations,
            dry_run: self.config.dry_run,
        }));

        if !self.config.dry_run {
            plan.metadata.total_iterations = self.config.iterations;
            plan.metadata.provider = self.provider.id().to_string();
            if !state.model.is_empty() {
                plan.metadata.model.clone_from(&state.model);
            }
        }

        let mut stop_reason = StopReason::IterationBudgetExhausted;
        for iteration in 1..=self.config.iterations {
            let Some(index) = plan.next_runnable() else {
                stop_reason = StopReason::NoRunnableSteps;
                break;
            };
            state.analytics.iterations += 1;
            self.run_iteration(&mut plan, index, iteration, &mut state).await?;
            if self.config.dry_run {
                stop_reason = StopReason::DryRun;
                break;
            }
        }
        if stop_reason == StopReason::IterationBudgetExhausted && plan.next_runnable().is_none() {
            stop_reason = StopReason::NoRunnableSteps;
        }

        state.analytics.baseline_cache_hits = state.baseline.hits();
        state.analytics.baseline_cache_misses = state.baseline.misses();

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            iterations: state.analytics.iterations,
            completed_steps: plan.count_with_status(StepStatus::Done),
            failed_steps: plan.count_with_status(StepStatus::Failed),
            pending_steps: plan.count_with_status(StepStatus::Pending)
                + plan.count_with_status(StepStatus::InProgress),
            stop_reason,
            analytics: state.analytics,
        };
        self.sink.emit(&EventPayload::RunFinished(RunFinishedPayload {
            run_id: summary.run_id.clone(),
            stop_reason: summary.stop_reason,
            completed_steps: summary.completed_steps,
            failed_steps: summary.failed_steps,
            pending_steps: summary.pending_steps,
            analytics: summary.analytics.clone(),
        }));
        Ok(summary)
    }

    /// One pass over the step at `index`. The plan is persisted on every
    /// path except dry runs.
    async fn run_iteration(
        &self,
        plan: &mut Plan,
        index: usize,
        iteration: u32,
        state: &mut RunState,
    ) -> Result<()> {
        let step = plan.steps[index].clone();

        let snapshot = state.fingerprinter.snapshot().await;
        let fingerprint = StepExecutionFingerprint::compute(&step, &snapshot.fingerprint);
        let baseline = state
            .baseline
            .check(&step.success_criteria, &fingerprint, &self.workdir, snapshot.available)
            .await?;

        self.sink.emit(&EventPayload::IterationStarted(IterationStartedPayload {
            iteration,
            step_id: step.id.clone(),
            attempt: step.attempts + 1,
            max_attempts: step.max_attempts,
            baseline_passed: baseline.result.passed,
            baseline_cached: baseline.cached,
        }));

        let prompt = self.prompt_builder.build(&PromptContext {
            plan: &*plan,
            step: &step,
            git_state: &snapshot.state_text,
            baseline_failure: baseline.result.failure_output(),
            context_files: &self.config.context_files,
        });
        let input = self.provider_input(prompt, &state.model, &step.id, plan);

        if self.config.dry_run {
            let command = self.provider.build_command(&input);
            self.sink.emit(&EventPayload::DryRun(DryRunPayload {
                step_id: step.id.clone(),
                command: command.to_string(),
            }));
            return Ok(());
        }

        plan.steps[index].status = StepStatus::InProgress;
        self.store.save(plan)?;

        let outcome = self
            .retry
            .execute(self.provider.as_ref(), &input, &step.id, self.sink.as_ref())
            .await?;

        state.analytics.provider_calls += outcome.provider_calls;
        state.analytics.logic_retries += outcome.logic_attempts.saturating_sub(1);
        state.analytics.transient_retries += outcome.transient_retries;
        state.analytics.add_event_counts(&outcome.event_counts);
        plan.metadata.completed_iterations += 1;
        if let Some(session) = &outcome.result.session_id {
            plan.metadata.resume_session_id = Some(session.clone());
        }

        let message = outcome.message.clone().unwrap_or_default();
        match outcome.failure {
            Some(FailureKind::Transient) => {
                warn!(step_id = %step.id, "transient retries exhausted; step stays pending");
                let step = &mut plan.steps[index];
                step.status = StepStatus::Pending;
                step.last_error = Some(truncate_tail(&message, MAX_LAST_ERROR_CHARS));
            }
            Some(kind) => {
                self.fail_attempt(&mut plan.steps[index], &format!("{kind}: {message}"));
            }
            None => {
                self.verify(plan, index, &outcome.result, baseline.result.passed, state)
                    .await?;
            }
        }

        self.store.save(plan)?;
        Ok(())
    }

    /// Gate a successful agent run: no-op check, criteria, post-checks,
    /// then completion and the optional commit.
    async fn verify(
        &self,
        plan: &mut Plan,
        index: usize,
        result: &ProviderExecutionResult,
        baseline_passed: bool,
        state: &mut RunState,
    ) -> Result<()> {
        let step = plan.steps[index].clone();

        let noop_accepted = match state
            .noop
            .evaluate(&step, baseline_passed, result, &self.workdir)
            .await?
        {
            NoOpDecision::Reject {
                changed_files,
                criteria,
            } => {
                state.analytics.noop_rejections += 1;
                state.analytics.record_criteria(false, criteria.duration);
                self.sink.emit(&EventPayload::NoopRejected(NoopRejectedPayload {
                    step_id: step.id.clone(),
                    changed_files,
                }));
                let target = &mut plan.steps[index];
                target.status = StepStatus::Pending;
                target.last_error = Some(failure_message(
                    &format!(
                        "no changes to {}; success criteria still fail:",
                        step.files.join(", ")
                    ),
                    &criteria.output,
                ));
                return Ok(());
            }
            NoOpDecision::Accept { criteria, .. } => {
                if let Some(criteria) = criteria {
                    state.analytics.record_criteria(criteria.passed, criteria.duration);
                }
                true
            }
            NoOpDecision::Proceed => {
                let outcome = state
                    .criteria
                    .evaluate(&step.success_criteria, result, &self.workdir)
                    .await?;
                state.analytics.record_criteria(outcome.passed, outcome.duration);
                if !outcome.passed {
                    self.fail_attempt(
                        &mut plan.steps[index],
                        &failure_message("success criteria failed:", &outcome.output),
                    );
                    return Ok(());
                }
                false
            }
        };

        let post = state.post_checks.run(&step.post_checks, &self.workdir).await?;
        state.analytics.record_post_checks(post.commands_run, !post.passed);
        if !post.passed {
            let command = post.failed_command.clone().unwrap_or_default();
            self.sink.emit(&EventPayload::PostCheckFailed(PostCheckFailedPayload {
                step_id: step.id.clone(),
                command: command.clone(),
                exit_code: post.exit_code,
            }));
            self.fail_attempt(
                &mut plan.steps[index],
                &failure_message(&format!("post-check failed: {command}"), &post.output),
            );
            return Ok(());
        }

        let target = &mut plan.steps[index];
        target.status = StepStatus::Done;
        target.last_error = None;
        self.sink.emit(&EventPayload::StepDone(StepDonePayload {
            step_id: step.id.clone(),
            attempts: target.attempts,
            noop_accepted,
        }));

        if state.commit_gate.is_enabled() {
            // The committed plan should already show the step as done.
            self.store.save(plan)?;
            match commit_step(&self.workdir, &step).await {
                Ok(Some(message)) => {
                    state.analytics.commits += 1;
                    self.sink.emit(&EventPayload::CommitCreated(CommitCreatedPayload {
                        step_id: step.id.clone(),
                        message,
                    }));
                }
                Ok(None) => {}
                Err(err) => warn!(step_id = %step.id, error = %err, "auto-commit failed"),
            }
        }
        Ok(())
    }

    /// Consume one attempt and record why.
    fn fail_attempt(&self, step: &mut Step, reason: &str) {
        step.attempts = (step.attempts + 1).min(step.max_attempts);
        step.status = if step.attempts >= step.max_attempts {
            StepStatus::Failed
        } else {
            StepStatus::Pending
        };
        let reason = truncate_tail(reason, MAX_LAST_ERROR_CHARS);
        step.last_error = Some(reason.clone());
        self.sink.emit(&EventPayload::StepFailed(StepFailedPayload {
            step_id: step.id.clone(),
            attempts: step.attempts,
            max_attempts: step.max_attempts,
            status: step.status,
            reason,
        }));
    }

    fn provider_input(&self, prompt: String, model: &str, step_id: &str, plan: &Plan) -> ProviderInput {
        let mut input = ProviderInput::new(prompt, model, self.workdir.clone());
        input.thinking.clone_from(&self.config.thinking);
        input.max_turns = self.config.max_turns;
        input.timeout = secs(self.config.provider_timeout_sec);
        input.heartbeat = secs(self.config.heartbeat_sec);
        if self.config.resume_sessions {
            input.resume_session_id.clone_from(&plan.metadata.resume_session_id);
            if let Some(session) = &input.resume_session_id {
                debug!(session_id = %session, "resuming provider session");
            }
        }

        info!(
            step_id,
            provider = self.provider.id(),
            model = %input.model,
            prompt_chars = input.prompt.len(),
            "prepared provider input"
        );

        let sink = Arc::clone(&self.sink);
        let event_step_id = step_id.to_string();
        input.on_event = Some(Arc::new(move |event: &ProviderEvent| {
            sink.emit(&EventPayload::ProviderEvent(ProviderEventPayload {
                step_id: event_step_id.clone(),
                event: event.clone(),
            }));
        }));
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_keeps_headline() {
        let detail = "x".repeat(5000);
        let message = failure_message("post-check failed: cargo test", &detail);
        assert!(message.starts_with("post-check failed: cargo test\n..."));
        assert!(message.chars().count() <= MAX_LAST_ERROR_CHARS + 3);
    }

    #[test]
    fn failure_message_without_detail() {
        assert_eq!(failure_message("success criteria failed:", "  \n"), "success criteria failed:");
    }

    #[test]
    fn fail_attempt_caps_at_max() {
        let store = PlanStore::new("/nonexistent/plan.json");
        let scheduler = StepScheduler::new(
            store,
            "/tmp",
            Arc::new(crate::provider::ClaudeAdapter),
            Config::default(),
        );
        let mut step = Step::new("s1", "Step", "false");
        step.max_attempts = 2;

        scheduler.fail_attempt(&mut step, "boom");
        assert_eq!((step.attempts, step.status), (1, StepStatus::Pending));
        scheduler.fail_attempt(&mut step, "boom");
        assert_eq!((step.attempts, step.status), (2, StepStatus::Failed));
        scheduler.fail_attempt(&mut step, "boom");
        assert_eq!(step.attempts, 2);
        assert_eq!(step.last_error.as_deref(), Some("boom"));
    }
}
