//! Shared child-process driver for streaming agent CLIs.
//!
//! Stdout is parsed line by line as it arrives; each parsed event is handed
//! to the caller's callback before the process exits. A heartbeat task logs
//! progress and is cancelled by a drop guard on every exit path.

use super::{ProviderCommand, ProviderError, ProviderInput, Result};
use std::process::Stdio;
use std::time::{Duration, Instant};
use steploop_core::{ProviderEvent, ProviderExecutionResult};
use tokio::io::{AsyncBufReadExt, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout for capturing stdout/stderr after the process exits or is killed.
///
/// Grandchildren can keep pipes open after the agent itself is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum bytes kept from stdout/stderr.
const MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;

/// Incremental parser for a provider's stdout stream.
pub trait StreamParser: Send + 'static {
    /// Events carried by one stdout line. Unparseable lines yield nothing.
    fn parse_line(&mut self, line: &str) -> Vec<ProviderEvent>;

    /// Final assistant message, once the stream ended.
    fn final_text(&self) -> String;

    fn session_id(&self) -> Option<String>;

    /// Model the provider reported actually serving the request.
    fn reported_model(&self) -> Option<String> {
        None
    }

    /// The stream itself declared the run failed, whatever the exit code.
    fn failed(&self) -> bool {
        false
    }
}

/// Read from an async reader with a maximum byte limit.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            warn!(max_bytes, "output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }

        let to_take = n.min(remaining);
        buf.extend_from_slice(&chunk[..to_take]);
    }

    Ok(buf)
}

/// What the stdout reader hands back once the pipe closes.
struct StreamCapture<P> {
    raw: String,
    events: Vec<ProviderEvent>,
    parser: P,
}

async fn read_events<R, P>(
    reader: R,
    mut parser: P,
    input: ProviderInput,
) -> std::io::Result<StreamCapture<P>>
where
    R: tokio::io::AsyncRead + Unpin,
    P: StreamParser,
{
    let mut lines = tokio::io::BufReader::new(reader).lines();
    let mut raw = String::new();
    let mut events = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if raw.len() < MAX_OUTPUT_BYTES {
            raw.push_str(&line);
            raw.push('\n');
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        for event in parser.parse_line(trimmed) {
            input.emit(&event);
            events.push(event);
        }
    }

    Ok(StreamCapture {
        raw,
        events,
        parser,
    })
}

fn spawn_heartbeat(token: CancellationToken, program: String, interval: Duration) {
    tokio::spawn(async move {
        let started = Instant::now();
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    info!(
                        provider = %program,
                        elapsed_sec = started.elapsed().as_secs(),
                        "provider still running"
                    );
                }
            }
        }
    });
}

/// Run `command`, parse its stdout with `parser`, enforce the input timeout.
///
/// Non-zero exits and timeouts come back as `ok=false` results; only a
/// failure to start the process is an error.
pub async fn run_streaming<P: StreamParser>(
    command: &ProviderCommand,
    input: &ProviderInput,
    parser: P,
) -> Result<ProviderExecutionResult> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&command.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(
        program = %command.program,
        model = %input.model,
        workdir = %command.workdir.display(),
        "spawning provider process"
    );

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProviderError::NotInstalled(command.program.clone())
        } else {
            ProviderError::Spawn(e)
        }
    })?;

    let heartbeat = CancellationToken::new();
    let _heartbeat_guard = heartbeat.clone().drop_guard();
    if !input.heartbeat.is_zero() {
        spawn_heartbeat(heartbeat, command.program.clone(), input.heartbeat);
    }

    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(read_events(stdout, parser, input.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(read_bounded(stderr, MAX_OUTPUT_BYTES)));

    let started = Instant::now();
    let status = if input.timeout.is_zero() {
        Some(child.wait().await?)
    } else {
        match timeout(input.timeout, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                warn!(
                    program = %command.program,
                    timeout_sec = input.timeout.as_secs(),
                    "provider timed out; killing"
                );
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill timed-out provider");
                }
                let _ = child.wait().await;
                None
            }
        }
    };

    let capture = match stdout_task {
        Some(task) => match timeout(IO_CAPTURE_TIMEOUT, task).await {
            Ok(Ok(Ok(capture))) => Some(capture),
            Ok(Ok(Err(err))) => {
                warn!(error = %err, "stdout capture failed");
                None
            }
            Ok(Err(err)) => {
                warn!(error = %err, "stdout task panicked");
                None
            }
            Err(_) => {
                warn!("stdout capture timed out");
                None
            }
        },
        None => None,
    };
    let stderr = match stderr_task {
        Some(task) => match timeout(IO_CAPTURE_TIMEOUT, task).await {
            Ok(Ok(Ok(buf))) => String::from_utf8_lossy(&buf).into_owned(),
            Ok(Ok(Err(err))) => {
                warn!(error = %err, "stderr capture failed");
                String::new()
            }
            Ok(Err(err)) => {
                warn!(error = %err, "stderr task panicked");
                String::new()
            }
            Err(_) => {
                warn!("stderr capture timed out");
                String::new()
            }
        },
        None => String::new(),
    };

    let timed_out = status.is_none();
    let exit_code = status.and_then(|s| s.code());
    let mut result = ProviderExecutionResult {
        exit_code,
        timed_out,
        stderr,
        used_model: input.model.clone(),
        ..Default::default()
    };
    let mut stream_failed = false;
    if let Some(capture) = capture {
        result.stdout = capture.raw;
        result.events = capture.events;
        result.final_text = capture.parser.final_text();
        result.session_id = capture.parser.session_id();
        if let Some(model) = capture.parser.reported_model() {
            result.used_model = model;
        }
        stream_failed = capture.parser.failed();
    }
    if timed_out {
        result.stderr.push_str(&format!(
            "\nprovider timed out after {}s",
            input.timeout.as_secs()
        ));
    }
    result.ok = !timed_out && exit_code == Some(0) && !stream_failed;

    info!(
        program = %command.program,
        ok = result.ok,
        exit_code = ?exit_code,
        timed_out,
        events = result.events.len(),
        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "provider process finished"
    );
    Ok(result)
}
