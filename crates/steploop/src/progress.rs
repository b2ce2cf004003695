//! Progress sinks.
//!
//! The scheduler only emits structured events; rendering and persistence
//! belong to whichever sinks the caller installs.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use steploop_core::events::{EventPayload, RunLogRecord};
use tracing::{debug, info, warn};

/// Receives run events as they happen. Sinks must not fail the run.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &EventPayload);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: &EventPayload) {
        match event {
            EventPayload::RunStarted(p) => info!(
                run_id = %p.run_id,
                plan = %p.plan_path,
                provider = %p.provider,
                model = %p.model,
                iterations = p.iterations,
                dry_run = p.dry_run,
                "run started"
            ),
            EventPayload::IterationStarted(p) => info!(
                iteration = p.iteration,
                step_id = %p.step_id,
                attempt = p.attempt,
                max_attempts = p.max_attempts,
                baseline_passed = p.baseline_passed,
                baseline_cached = p.baseline_cached,
                "iteration started"
            ),
            EventPayload::ProviderEvent(p) => {
                if p.event.is_error() {
                    warn!(step_id = %p.step_id, event = ?p.event, "provider error event");
                } else {
                    debug!(step_id = %p.step_id, kind = p.event.kind(), "provider event");
                }
            }
            EventPayload::RetryScheduled(p) => warn!(
                step_id = %p.step_id,
                transient_retry = p.transient_retry,
                delay_ms = p.delay_ms,
                reason = %p.reason,
                "transient provider failure; retry scheduled"
            ),
            EventPayload::AttemptFailed(p) => warn!(
                step_id = %p.step_id,
                logic_attempt = p.logic_attempt,
                kind = %p.kind,
                message = %p.message,
                "provider attempt failed"
            ),
            EventPayload::NoopRejected(p) => warn!(
                step_id = %p.step_id,
                changed_files = p.changed_files.len(),
                "no relevant change and criteria still fail; retrying"
            ),
            EventPayload::StepDone(p) => info!(
                step_id = %p.step_id,
                attempts = p.attempts,
                noop_accepted = p.noop_accepted,
                "step done"
            ),
            EventPayload::StepFailed(p) => warn!(
                step_id = %p.step_id,
                attempts = p.attempts,
                max_attempts = p.max_attempts,
                status = %p.status,
                reason = %p.reason,
                "step attempt failed"
            ),
            EventPayload::PostCheckFailed(p) => warn!(
                step_id = %p.step_id,
                cmd = %p.command,
                exit_code = ?p.exit_code,
                "post-check failed"
            ),
            EventPayload::CommitCreated(p) => {
                info!(step_id = %p.step_id, message = %p.message, "commit created");
            }
            EventPayload::DryRun(p) => {
                info!(step_id = %p.step_id, command = %p.command, "dry run");
            }
            EventPayload::RunFinished(p) => info!(
                run_id = %p.run_id,
                stop_reason = p.stop_reason.as_str(),
                completed = p.completed_steps,
                failed = p.failed_steps,
                pending = p.pending_steps,
                analytics = %p.analytics.summary_line(),
                "run finished"
            ),
        }
    }
}

/// Appends one JSON record per event to `<dir>/run-<run_id>.jsonl`.
#[derive(Debug)]
pub struct JsonlRunLog {
    run_id: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlRunLog {
    pub fn create(dir: &Path, run_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("run-{run_id}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            run_id: run_id.to_string(),
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressSink for JsonlRunLog {
    fn emit(&self, event: &EventPayload) {
        let record = RunLogRecord {
            id: uuid::Uuid::now_v7().to_string(),
            run_id: self.run_id.clone(),
            timestamp: chrono::Utc::now(),
            payload: event.clone(),
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialize run log record");
                return;
            }
        };
        let Ok(mut file) = self.file.lock() else {
            warn!(path = %self.path.display(), "run log lock poisoned");
            return;
        };
        if let Err(err) = writeln!(file, "{line}") {
            warn!(path = %self.path.display(), error = %err, "failed to write run log");
        }
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: &EventPayload) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
