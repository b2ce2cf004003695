//! End-to-end scheduler scenarios against real git repos and a scripted
//! provider.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steploop::progress::ProgressSink;
use steploop::provider::{ProviderAdapter, ProviderCommand, ProviderInput};
use steploop::retry::RetryPolicy;
use steploop::shell::{BashShell, ShellExecutor, ShellOutput};
use steploop::{RunSummary, StepScheduler};
use steploop_core::events::{EventPayload, EventType, RunLogRecord, StopReason};
use steploop_core::prompt::{PromptBuilder, PromptContext};
use steploop_core::{Config, Plan, PlanStore, ProviderEvent, ProviderExecutionResult, Step, StepStatus};
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Fixtures
// -----------------------------------------------------------------------------

/// One scripted provider call: optionally write a file, then return `result`.
struct Call {
    write: Option<(&'static str, &'static str)>,
    result: ProviderExecutionResult,
}

impl Call {
    fn ok() -> Self {
        Self {
            write: None,
            result: ProviderExecutionResult {
                ok: true,
                exit_code: Some(0),
                final_text: "Finished the step.".to_string(),
                events: vec![ProviderEvent::AssistantText {
                    text: "Finished the step.".to_string(),
                }],
                session_id: Some("sess-1".to_string()),
                ..Default::default()
            },
        }
    }

    fn ok_writing(path: &'static str, content: &'static str) -> Self {
        Self {
            write: Some((path, content)),
            ..Self::ok()
        }
    }

    fn failing(stderr: &str) -> Self {
        Self {
            write: None,
            result: ProviderExecutionResult {
                ok: false,
                exit_code: Some(1),
                stderr: stderr.to_string(),
                ..Default::default()
            },
        }
    }

    fn with_events(events: Vec<ProviderEvent>, final_text: &str) -> Self {
        let mut call = Self::ok();
        call.result.events = events;
        call.result.final_text = final_text.to_string();
        call
    }
}

/// Replays scripted calls; once the script runs out every call succeeds.
#[derive(Default)]
struct ScriptedProvider {
    script: Mutex<VecDeque<Call>>,
    calls: Mutex<u32>,
}

impl ScriptedProvider {
    fn new(script: Vec<Call>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn name(&self) -> &'static str {
        "Scripted provider"
    }

    fn executable(&self) -> &'static str {
        "scripted-agent"
    }

    fn models(&self) -> &'static [&'static str] {
        &["primary", "backup"]
    }

    fn thinking_levels(&self) -> &'static [&'static str] {
        &[]
    }

    fn build_command(&self, input: &ProviderInput) -> ProviderCommand {
        ProviderCommand {
            program: "scripted-agent".to_string(),
            args: vec!["--model".to_string(), input.model.clone(), input.prompt.clone()],
            env: Vec::new(),
            workdir: input.workdir.clone(),
        }
    }

    async fn execute(
        &self,
        input: &ProviderInput,
    ) -> steploop::provider::Result<ProviderExecutionResult> {
        *self.calls.lock().unwrap() += 1;
        let call = self.script.lock().unwrap().pop_front().unwrap_or_else(Call::ok);
        if let Some((path, content)) = call.write {
            let target = input.workdir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        for event in &call.result.events {
            input.emit(event);
        }
        Ok(call.result)
    }

    fn fallback_models(&self, requested: &str) -> Vec<String> {
        self.models()
            .iter()
            .filter(|m| **m != requested)
            .map(ToString::to_string)
            .collect()
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<EventPayload>>,
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: &EventPayload) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl RecordingSink {
    fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    fn types(&self) -> Vec<EventType> {
        self.events.lock().unwrap().iter().map(EventPayload::event_type).collect()
    }

    fn find(&self, event_type: EventType) -> Option<EventPayload> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.event_type() == event_type)
            .cloned()
    }
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git").args(args).current_dir(dir).output().unwrap();
    String::from_utf8(out.stdout).unwrap()
}

/// A git repo with one commit.
fn setup_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init"]);
    git(dir.path(), &["config", "user.email", "test@test.com"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    std::fs::write(dir.path().join("README.md"), "# Test\n").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-m", "Initial commit"]);
    dir
}

/// Repo, plan file (kept outside the repo), and scheduler wiring.
struct Harness {
    repo: TempDir,
    plan_dir: TempDir,
    provider: Arc<ScriptedProvider>,
    sink: Arc<RecordingSink>,
    config: Config,
}

impl Harness {
    fn new(steps: Vec<Step>, script: Vec<Call>) -> Self {
        let repo = setup_repo();
        let plan_dir = TempDir::new().unwrap();
        let mut plan = Plan::new("Exercise the scheduler", steps);
        plan.metadata.model = "primary".to_string();
        PlanStore::new(plan_dir.path().join("plan.json"))
            .save(&plan)
            .unwrap();
        let config = Config {
            iterations: 1,
            heartbeat_sec: 0,
            provider_timeout_sec: 60,
            criteria_timeout_sec: 30,
            post_check_timeout_sec: 30,
            run_log_dir: plan_dir.path().join("runs"),
            ..Config::default()
        };
        Self {
            repo,
            plan_dir,
            provider: ScriptedProvider::new(script),
            sink: Arc::new(RecordingSink::default()),
            config,
        }
    }

    fn plan_path(&self) -> PathBuf {
        self.plan_dir.path().join("plan.json")
    }

    fn scheduler(&self) -> StepScheduler {
        StepScheduler::new(
            PlanStore::new(self.plan_path()),
            self.repo.path(),
            Arc::clone(&self.provider) as Arc<dyn ProviderAdapter>,
            self.config.clone(),
        )
        .with_sink(Arc::clone(&self.sink) as Arc<dyn ProgressSink>)
        .with_retry_policy(
            RetryPolicy::immediate().with_transient_limit(self.config.max_transient_retries),
        )
    }

    async fn run(&self) -> RunSummary {
        self.scheduler().run().await.unwrap()
    }

    fn plan(&self) -> Plan {
        PlanStore::new(self.plan_path()).load().unwrap()
    }

    fn step(&self, index: usize) -> Step {
        self.plan().steps[index].clone()
    }
}

fn step(id: &str, criteria: &str) -> Step {
    Step::new(id, format!("Step {id}"), criteria)
}

// -----------------------------------------------------------------------------
// Scenarios
// -----------------------------------------------------------------------------

#[tokio::test]
async fn passing_step_completes_in_one_iteration() {
    let harness = Harness::new(vec![step("s1", "true")], vec![Call::ok()]);
    let summary = harness.run().await;

    assert_eq!(summary.completed_steps, 1);
    assert_eq!(summary.stop_reason, StopReason::NoRunnableSteps);
    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Done);
    assert_eq!(s1.attempts, 0);
    assert_eq!(s1.last_error, None);

    let plan = harness.plan();
    assert_eq!(plan.metadata.completed_iterations, 1);
    assert_eq!(plan.metadata.total_iterations, 1);
    assert_eq!(plan.metadata.provider, "scripted");
    assert_eq!(plan.metadata.resume_session_id.as_deref(), Some("sess-1"));

    assert_eq!(
        harness.sink.types(),
        vec![
            EventType::RunStarted,
            EventType::IterationStarted,
            EventType::ProviderEvent,
            EventType::StepDone,
            EventType::RunFinished,
        ]
    );
}

#[tokio::test]
async fn failing_criteria_exhaust_single_attempt() {
    let mut s1 = step("s1", "false");
    s1.max_attempts = 1;
    let harness = Harness::new(vec![s1], vec![Call::ok()]);
    let summary = harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Failed);
    assert_eq!(s1.attempts, 1);
    assert!(s1.last_error.unwrap().starts_with("success criteria failed"));
    assert_eq!(summary.failed_steps, 1);
    assert_eq!(summary.analytics.criteria_failed, 1);
}

#[tokio::test]
async fn failing_criteria_leave_step_pending_until_budget_is_spent() {
    let mut harness = Harness::new(vec![step("s1", "false")], Vec::new());
    harness.config.iterations = 5;
    let summary = harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Failed);
    assert_eq!(s1.attempts, 3);
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.stop_reason, StopReason::NoRunnableSteps);
    assert_eq!(harness.sink.count(EventType::StepFailed), 3);
}

#[tokio::test]
async fn transient_failures_do_not_exhaust_attempts() {
    let mut script: Vec<Call> = (0..5)
        .map(|_| Call::failing("API Error: 503 Service Unavailable"))
        .collect();
    script.push(Call::ok());
    let harness = Harness::new(vec![step("s1", "true")], script);
    let summary = harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Done);
    assert_eq!(s1.attempts, 0);
    assert_eq!(harness.provider.calls(), 6);
    assert_eq!(summary.analytics.transient_retries, 5);
    assert_eq!(summary.analytics.provider_calls, 6);
    assert_eq!(harness.sink.count(EventType::RetryScheduled), 5);
    assert_eq!(harness.sink.count(EventType::AttemptFailed), 0);
}

#[tokio::test]
async fn exhausted_transient_retries_keep_attempts_unchanged() {
    let script: Vec<Call> = (0..20).map(|_| Call::failing("429 Too Many Requests")).collect();
    let mut harness = Harness::new(vec![step("s1", "true")], script);
    harness.config.iterations = 3;
    harness.config.max_transient_retries = 2;
    let summary = harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Pending);
    assert_eq!(s1.attempts, 0);
    assert!(s1.last_error.unwrap().contains("transient retries exhausted"));
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.stop_reason, StopReason::IterationBudgetExhausted);
    assert_eq!(harness.provider.calls(), 9);
}

#[tokio::test]
async fn generic_provider_failure_consumes_one_attempt() {
    let script = vec![Call::failing("boom"), Call::failing("boom"), Call::failing("boom")];
    let harness = Harness::new(vec![step("s1", "true")], script);
    let summary = harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Pending);
    assert_eq!(s1.attempts, 1);
    assert!(s1.last_error.unwrap().starts_with("generic: provider exited with code 1"));
    assert_eq!(harness.provider.calls(), 3);
    assert_eq!(summary.analytics.logic_retries, 2);
    assert_eq!(harness.sink.count(EventType::AttemptFailed), 3);
}

#[tokio::test]
async fn model_unavailable_stops_immediately() {
    let script = vec![Call::failing("Error: unknown model 'primary'")];
    let harness = Harness::new(vec![step("s1", "true")], script);
    harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.attempts, 1);
    let error = s1.last_error.unwrap();
    assert!(error.starts_with("model_unavailable:"));
    assert!(error.contains("fallback models: backup"));
    assert_eq!(harness.provider.calls(), 1);
}

#[tokio::test]
async fn green_baseline_without_relevant_change_is_accepted() {
    let mut s1 = step("s1", "true");
    s1.files = vec!["src/".to_string()];
    let harness = Harness::new(vec![s1], vec![Call::ok()]);
    harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Done);
    assert_eq!(s1.attempts, 0);
    match harness.sink.find(EventType::StepDone) {
        Some(EventPayload::StepDone(done)) => assert!(done.noop_accepted),
        other => panic!("expected step_done, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_baseline_without_relevant_change_is_a_free_retry() {
    let mut s1 = step("s1", "test -f src/feature.rs");
    s1.files = vec!["./src/*".to_string()];
    let harness = Harness::new(vec![s1], vec![Call::ok_writing("notes.txt", "thinking\n")]);
    let summary = harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Pending);
    assert_eq!(s1.attempts, 0);
    assert!(s1.last_error.unwrap().starts_with("no changes to ./src/*"));
    assert_eq!(summary.analytics.noop_rejections, 1);
    match harness.sink.find(EventType::NoopRejected) {
        Some(EventPayload::NoopRejected(rejected)) => {
            assert_eq!(rejected.changed_files, vec!["notes.txt".to_string()]);
        }
        other => panic!("expected noop_rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn relevant_change_is_verified_by_criteria() {
    let mut s1 = step("s1", "test -f src/feature.rs");
    s1.files = vec!["src/".to_string()];
    let harness = Harness::new(
        vec![s1],
        vec![Call::ok_writing("src/feature.rs", "pub fn feature() {}\n")],
    );
    harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Done);
    assert_eq!(s1.attempts, 0);
}

#[tokio::test]
async fn failing_post_check_fails_step_and_names_command() {
    let mut s1 = step("s1", "true");
    s1.max_attempts = 1;
    s1.post_checks = vec!["true".to_string(), "false".to_string()];
    let harness = Harness::new(vec![s1], vec![Call::ok()]);
    let summary = harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Failed);
    assert_eq!(s1.attempts, 1);
    assert!(s1.last_error.unwrap().starts_with("post-check failed: false"));
    assert_eq!(summary.analytics.post_checks_run, 2);
    assert_eq!(summary.analytics.post_checks_failed, 1);
    match harness.sink.find(EventType::PostCheckFailed) {
        Some(EventPayload::PostCheckFailed(failed)) => {
            assert_eq!(failed.command, "false");
            assert_eq!(failed.exit_code, Some(1));
        }
        other => panic!("expected post_check_failed, got {other:?}"),
    }
}

#[tokio::test]
async fn post_check_failure_increments_attempts_once() {
    let mut s1 = step("s1", "true");
    s1.post_checks = vec!["false".to_string()];
    let harness = Harness::new(vec![s1], vec![Call::ok()]);
    harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Pending);
    assert_eq!(s1.attempts, 1);
}

const NARRATIVE: &str = "produce a lengthy sentence and trigger a tool call";

const LONG_TEXT: &str = "I inspected the repository layout, read the existing module, \
    added the requested function with documentation, and confirmed that the \
    surrounding tests still describe the intended behaviour.";

#[tokio::test]
async fn narrative_criteria_pass_with_tool_call_and_long_text() {
    let call = Call::with_events(
        vec![
            ProviderEvent::ToolCall {
                name: "Read".to_string(),
                input: "{}".to_string(),
            },
            ProviderEvent::AssistantText {
                text: LONG_TEXT.to_string(),
            },
        ],
        LONG_TEXT,
    );
    let harness = Harness::new(vec![step("s1", NARRATIVE)], vec![call]);
    let summary = harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Done);
    assert_eq!(s1.attempts, 0);
    assert_eq!(summary.analytics.event_count("tool_call"), 1);
}

#[tokio::test]
async fn narrative_criteria_fail_without_tool_call() {
    let call = Call::with_events(
        vec![ProviderEvent::AssistantText {
            text: LONG_TEXT.to_string(),
        }],
        LONG_TEXT,
    );
    let harness = Harness::new(vec![step("s1", NARRATIVE)], vec![call]);
    harness.run().await;

    let s1 = harness.step(0);
    assert_eq!(s1.status, StepStatus::Pending);
    assert_eq!(s1.attempts, 1);
    let error = s1.last_error.unwrap();
    assert!(error.contains("FAIL: tool_call event"));
    assert!(error.contains("PASS: output length"));
}

#[tokio::test]
async fn unchanged_worktree_reuses_baseline() {
    let mut harness = Harness::new(vec![step("s1", "false")], Vec::new());
    harness.config.iterations = 2;
    let summary = harness.run().await;

    assert_eq!(summary.analytics.baseline_cache_misses, 1);
    assert_eq!(summary.analytics.baseline_cache_hits, 1);
    let cached: Vec<bool> = harness
        .sink
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            EventPayload::IterationStarted(p) => Some(p.baseline_cached),
            _ => None,
        })
        .collect();
    assert_eq!(cached, vec![false, true]);
}

#[tokio::test]
async fn steps_run_in_plan_order() {
    let mut harness = Harness::new(vec![step("first", "true"), step("second", "true")], Vec::new());
    harness.config.iterations = 5;
    let summary = harness.run().await;

    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.completed_steps, 2);
    assert_eq!(summary.stop_reason, StopReason::NoRunnableSteps);
    let started: Vec<String> = harness
        .sink
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            EventPayload::IterationStarted(p) => Some(p.step_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["first", "second"]);
}

#[tokio::test]
async fn auto_commit_records_completed_step() {
    let mut s1 = step("s1", "test -f src/feature.rs");
    s1.title = "Add feature".to_string();
    s1.files = vec!["src/".to_string()];
    let mut harness = Harness::new(
        vec![s1],
        vec![Call::ok_writing("src/feature.rs", "pub fn feature() {}\n")],
    );
    harness.config.auto_commit = true;
    let summary = harness.run().await;

    assert_eq!(summary.analytics.commits, 1);
    assert_eq!(git(harness.repo.path(), &["log", "-1", "--format=%s"]).trim(), "s1: Add feature");
    assert!(git(harness.repo.path(), &["status", "--short"]).trim().is_empty());
    assert_eq!(harness.sink.count(EventType::CommitCreated), 1);
}

#[tokio::test]
async fn auto_commit_refuses_dirty_worktree() {
    let mut harness = Harness::new(
        vec![step("s1", "true")],
        vec![Call::ok_writing("src/feature.rs", "pub fn feature() {}\n")],
    );
    std::fs::write(harness.repo.path().join("wip.txt"), "operator work\n").unwrap();
    harness.config.auto_commit = true;
    let summary = harness.run().await;

    assert_eq!(summary.completed_steps, 1);
    assert_eq!(summary.analytics.commits, 0);
    assert_eq!(git(harness.repo.path(), &["log", "-1", "--format=%s"]).trim(), "Initial commit");
}

#[tokio::test]
async fn dry_run_renders_command_without_side_effects() {
    let mut harness = Harness::new(vec![step("s1", "true")], Vec::new());
    harness.config.dry_run = true;
    harness.config.iterations = 5;
    let before = std::fs::read_to_string(harness.plan_path()).unwrap();
    let summary = harness.run().await;

    assert_eq!(summary.stop_reason, StopReason::DryRun);
    assert_eq!(harness.provider.calls(), 0);
    assert_eq!(std::fs::read_to_string(harness.plan_path()).unwrap(), before);
    match harness.sink.find(EventType::DryRun) {
        Some(EventPayload::DryRun(dry)) => {
            assert_eq!(dry.step_id, "s1");
            assert!(dry.command.starts_with("scripted-agent --model primary"));
        }
        other => panic!("expected dry_run, got {other:?}"),
    }
}

#[tokio::test]
async fn run_log_mirrors_emitted_events() {
    let harness = Harness::new(vec![step("s1", "true")], vec![Call::ok()]);
    let mut scheduler = harness.scheduler().with_run_id("run-test");
    let log_path = scheduler.open_run_log(&harness.config.run_log_dir).unwrap();
    scheduler.run().await.unwrap();

    let records: Vec<RunLogRecord> = std::fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), harness.sink.types().len());
    assert!(records.iter().all(|r| r.run_id == "run-test"));
    assert_eq!(records.first().unwrap().payload.event_type(), EventType::RunStarted);
    assert_eq!(records.last().unwrap().payload.event_type(), EventType::RunFinished);
}

#[tokio::test]
async fn invalid_plan_aborts_before_any_iteration() {
    let harness = Harness::new(vec![step("s1", "true")], Vec::new());
    std::fs::write(harness.plan_path(), r#"{"schemaVersion": 2, "goal": "x", "steps": []}"#).unwrap();
    let err = harness.scheduler().run().await.unwrap_err();

    assert!(matches!(err, steploop::SchedulerError::Plan(_)));
    assert_eq!(harness.provider.calls(), 0);
    assert!(harness.sink.types().is_empty());
}

/// Counts shell invocations while delegating to bash.
#[derive(Default)]
struct CountingShell {
    calls: AtomicU32,
}

#[async_trait]
impl ShellExecutor for CountingShell {
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        timeout: Duration,
    ) -> steploop::shell::Result<ShellOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        BashShell.run(command, workdir, timeout).await
    }
}

#[tokio::test]
async fn cached_baseline_skips_the_shell() {
    let mut harness = Harness::new(vec![step("s1", "false")], Vec::new());
    harness.config.iterations = 2;
    let shell = Arc::new(CountingShell::default());
    harness
        .scheduler()
        .with_shell(Arc::clone(&shell) as Arc<dyn ShellExecutor>)
        .run()
        .await
        .unwrap();

    // One baseline run, then one criteria run per iteration.
    assert_eq!(shell.calls.load(Ordering::SeqCst), 3);
}

/// Records the baseline failure handed to each prompt.
#[derive(Default)]
struct CapturingPromptBuilder {
    baseline_failures: Mutex<Vec<Option<String>>>,
}

impl PromptBuilder for CapturingPromptBuilder {
    fn build(&self, ctx: &PromptContext<'_>) -> String {
        self.baseline_failures
            .lock()
            .unwrap()
            .push(ctx.baseline_failure.map(ToString::to_string));
        format!("work on {}", ctx.step.id)
    }
}

#[tokio::test]
async fn failing_baseline_output_reaches_the_prompt() {
    let harness = Harness::new(vec![step("s1", "echo missing feature >&2; false")], Vec::new());
    let builder = Arc::new(CapturingPromptBuilder::default());
    harness
        .scheduler()
        .with_prompt_builder(Arc::clone(&builder) as Arc<dyn PromptBuilder>)
        .run()
        .await
        .unwrap();

    let captured = builder.baseline_failures.lock().unwrap().clone();
    assert_eq!(captured.len(), 1);
    assert!(captured[0].as_deref().unwrap().contains("missing feature"));
}

#[tokio::test]
async fn baseline_reruns_every_iteration_without_git() {
    let mut harness = Harness::new(
        vec![step("s1", "cat progress.txt; false")],
        vec![Call::ok_writing("progress.txt", "second\n")],
    );
    harness.config.iterations = 2;
    std::fs::remove_dir_all(harness.repo.path().join(".git")).unwrap();
    std::fs::write(harness.repo.path().join("progress.txt"), "first\n").unwrap();
    let builder = Arc::new(CapturingPromptBuilder::default());
    let summary = harness
        .scheduler()
        .with_prompt_builder(Arc::clone(&builder) as Arc<dyn PromptBuilder>)
        .run()
        .await
        .unwrap();

    let captured = builder.baseline_failures.lock().unwrap().clone();
    assert_eq!(
        captured,
        vec![Some("first".to_string()), Some("second".to_string())]
    );
    assert_eq!(summary.analytics.baseline_cache_hits, 0);
    assert_eq!(summary.analytics.baseline_cache_misses, 2);
}
