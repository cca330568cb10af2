//! Child-process supervision: group spawning, NDJSON streaming, and liveness
//! deadlines.
//!
//! The supervisor launches an agent CLI in its own process group, consumes its
//! stdout line by line, and enforces three concurrent deadlines: an overall
//! wall-clock limit, an idle limit reset by meaningful output, and a per-tool
//! stopwatch for agents that announce a tool call and then go silent. Any
//! expiry kills the whole group; the reader then drains buffered output and
//! the run is classified as `timeout` or `stall`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

pub mod event;

pub use event::{
    ERROR_STALL, ERROR_TIMEOUT, EventKind, NormalizedEvent, RawResponse, StreamCallback,
    StreamUpdate,
};

pub const DEFAULT_OVERALL_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 900;

/// Display bound for tool results forwarded to the streaming callback.
pub const TOOL_RESULT_DISPLAY_CHARS: usize = 200;

/// Deadlines enforced on one supervised run.
#[derive(Debug, Clone, Copy)]
pub struct SuperviseOptions {
    pub overall_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for SuperviseOptions {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(DEFAULT_OVERALL_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

/// Spawn an agent CLI with piped stdio, isolated in its own process group.
///
/// The group isolation matters: agent CLIs commonly fork helpers that would
/// otherwise survive a kill and hold the stdout pipe open.
pub fn spawn_agent(mut cmd: Command, cwd: Option<&Path>) -> Result<Child> {
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);

    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    cmd.spawn().context("Failed to spawn agent CLI")
}

/// Kill the child's entire process group.
///
/// Safe to invoke repeatedly: the group either still exists (kill succeeds)
/// or is gone (the error is swallowed).
pub fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill() is async-signal-safe; negative PID targets the process group.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
            return;
        }
    }

    let _ = child.start_kill();
}

/// Truncate to at most `max_chars` characters (display bound, no ellipsis).
pub fn truncate_display(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// A tool call announced on the stream whose end has not been seen yet.
#[derive(Clone, Debug)]
struct PendingTool {
    name: String,
    input: Value,
    id: Option<String>,
}

impl PendingTool {
    fn start_update(&self) -> StreamUpdate {
        StreamUpdate::ToolStart {
            name: self.name.clone(),
            input: self.input.clone(),
            id: self.id.clone(),
        }
    }

    fn end_update(self, result: Option<String>) -> StreamUpdate {
        StreamUpdate::ToolEnd {
            name: self.name,
            input: self.input,
            id: self.id,
            result,
        }
    }
}

fn emit(callback: Option<&StreamCallback>, update: StreamUpdate) {
    if let Some(cb) = callback {
        cb(update);
    }
}

/// Mutable state carried across the NDJSON event loop.
#[derive(Default)]
struct StreamState {
    accumulated: Vec<String>,
    session_id: Option<String>,
    terminal: Option<Value>,
    pending_tool: Option<PendingTool>,
    tool_started_at: Option<Instant>,
}

impl StreamState {
    /// True when a pending tool has outlived the per-tool deadline.
    ///
    /// Checked on event arrival: an agent that announces a tool call and then
    /// emits nothing useful is killed as stalled even while chatter keeps the
    /// idle deadline fed.
    fn tool_deadline_exceeded(&self, deadline: Duration) -> bool {
        match (&self.tool_started_at, &self.pending_tool) {
            (Some(started), Some(tool)) if started.elapsed() > deadline => {
                warn!(
                    tool = %tool.name,
                    timeout_secs = deadline.as_secs(),
                    "tool call exceeded deadline without completing; killing process group"
                );
                true
            }
            _ => false,
        }
    }

    fn on_event(&mut self, normalized: NormalizedEvent, callback: Option<&StreamCallback>) {
        match normalized.kind {
            EventKind::Init => {
                if normalized.session_id.is_some() {
                    self.session_id = normalized.session_id;
                }
            }
            EventKind::Text => {
                let text = normalized.text.unwrap_or_default();
                if !text.is_empty() {
                    self.accumulated.push(text.clone());
                    emit(callback, StreamUpdate::TextDelta { text });
                    // Text after a tool call means the tool finished silently.
                    if let Some(tool) = self.pending_tool.take() {
                        emit(callback, tool.end_update(None));
                        self.tool_started_at = None;
                    }
                }
            }
            EventKind::ToolStart => {
                if let Some(prev) = self.pending_tool.take() {
                    emit(callback, prev.end_update(None));
                }
                let tool = PendingTool {
                    name: normalized.tool_name.unwrap_or_else(|| "unknown".to_string()),
                    input: normalized
                        .tool_input
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                    id: normalized.tool_id,
                };
                self.tool_started_at = Some(Instant::now());
                emit(callback, tool.start_update());
                self.pending_tool = Some(tool);
            }
            EventKind::ToolEnd => {
                self.tool_started_at = None;
                if let Some(tool) = self.pending_tool.take() {
                    let result = normalized
                        .tool_result
                        .map(|r| truncate_display(&r, TOOL_RESULT_DISPLAY_CHARS));
                    emit(callback, tool.end_update(result));
                }
            }
            EventKind::Result => {
                self.tool_started_at = None;
                if let Some(tool) = self.pending_tool.take() {
                    emit(callback, tool.end_update(None));
                }
                if normalized.session_id.is_some() {
                    self.session_id = normalized.session_id;
                }
                if let Some(text) = normalized.result_text
                    && !text.is_empty()
                {
                    self.accumulated.push(text);
                }
                self.terminal = Some(normalized.raw);
            }
            EventKind::Error => {
                if let Some(text) = normalized.text
                    && !text.is_empty()
                {
                    self.accumulated.push(format!("[Error]: {text}"));
                }
            }
        }
    }

    fn into_response(self, returncode: i32) -> RawResponse {
        let joined = self.accumulated.join("\n");
        match self.terminal {
            Some(raw) => {
                let mut result = raw
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if result.is_empty() {
                    result = joined;
                }
                let session_id = raw
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(self.session_id);
                let error = raw.get("error").and_then(Value::as_str).map(str::to_string);
                let usage = raw.get("usage").cloned();
                RawResponse {
                    result,
                    session_id,
                    error,
                    returncode: Some(returncode),
                    usage,
                    raw,
                    ..RawResponse::default()
                }
            }
            None => RawResponse {
                result: joined,
                session_id: self.session_id,
                returncode: Some(returncode),
                raw: Value::Object(serde_json::Map::new()),
                ..RawResponse::default()
            },
        }
    }
}

/// Run an NDJSON-streaming agent CLI to completion or bounded failure.
///
/// Each stdout line is parsed as JSON (malformed lines are skipped), passed
/// through `normalize`, and dispatched: session ids are captured, text is
/// accumulated and streamed, and tool start/end pairs are kept balanced by
/// synthesizing the missing `tool_end` whenever the CLI omits one. The first
/// terminal `result` event ends processing; later events are drained but not
/// honored.
///
/// Returns the classified [`RawResponse`] and the child's stderr, which is
/// drained only after the child exits.
pub async fn run_streaming(
    cmd: Command,
    cwd: Option<&Path>,
    options: SuperviseOptions,
    normalize: &(dyn Fn(&Value) -> NormalizedEvent + Sync),
    callback: Option<&StreamCallback>,
) -> Result<(RawResponse, String)> {
    let mut child = spawn_agent(cmd, cwd)?;
    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take();
    let mut lines = BufReader::new(stdout).lines();

    let overall_deadline = Instant::now() + options.overall_timeout;
    let mut idle_deadline = Instant::now() + options.idle_timeout;
    let mut timed_out = false;
    let mut stalled = false;
    let mut state = StreamState::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let Ok(raw) = serde_json::from_str::<Value>(trimmed) else {
                    debug!("skipping malformed stream line");
                    continue;
                };
                if timed_out || stalled || state.terminal.is_some() {
                    // Draining after a kill or after the terminal event;
                    // nothing here is honored.
                    continue;
                }
                let normalized = normalize(&raw);
                let meaningful = !(normalized.kind == EventKind::Text
                    && normalized.text.as_deref().unwrap_or_default().is_empty());
                if meaningful {
                    idle_deadline = Instant::now() + options.idle_timeout;
                }
                if state.tool_deadline_exceeded(options.idle_timeout) {
                    stalled = true;
                    kill_process_group(&mut child);
                    continue;
                }
                state.on_event(normalized, callback);
            }
            _ = tokio::time::sleep_until(overall_deadline), if !timed_out && !stalled => {
                timed_out = true;
                warn!(
                    timeout_secs = options.overall_timeout.as_secs(),
                    "overall deadline expired; killing process group"
                );
                kill_process_group(&mut child);
            }
            _ = tokio::time::sleep_until(idle_deadline), if !timed_out && !stalled => {
                stalled = true;
                warn!(
                    idle_secs = options.idle_timeout.as_secs(),
                    "no meaningful output within idle deadline; killing process group"
                );
                kill_process_group(&mut child);
            }
        }
    }

    let status = child.wait().await.context("Failed to wait for agent CLI")?;
    let stderr_text = drain_stderr(stderr).await;

    // When both deadlines armed the kill, the overall classification wins.
    if timed_out {
        return Ok((RawResponse::timeout(), stderr_text));
    }
    if stalled {
        return Ok((RawResponse::stall(state.session_id.take()), stderr_text));
    }

    let returncode = status.code().unwrap_or_else(|| {
        warn!("process terminated by signal, using exit code 1");
        1
    });
    Ok((state.into_response(returncode), stderr_text))
}

/// Run an agent CLI that emits unstructured text instead of NDJSON.
///
/// Every line resets the idle deadline; non-empty lines are accumulated and
/// streamed as text deltas. Lines that happen to parse as JSON `system` or
/// `result` events contribute a session id and the terminal text.
pub async fn run_plain_text(
    cmd: Command,
    cwd: Option<&Path>,
    options: SuperviseOptions,
    callback: Option<&StreamCallback>,
) -> Result<(RawResponse, String)> {
    let mut child = spawn_agent(cmd, cwd)?;
    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take();
    let mut lines = BufReader::new(stdout).lines();

    let overall_deadline = Instant::now() + options.overall_timeout;
    let mut idle_deadline = Instant::now() + options.idle_timeout;
    let mut timed_out = false;
    let mut stalled = false;

    let mut accumulated: Vec<String> = Vec::new();
    let mut session_id: Option<String> = None;
    let mut terminal_seen = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                idle_deadline = Instant::now() + options.idle_timeout;
                if timed_out || stalled || terminal_seen {
                    continue;
                }

                // Opportunistic JSON parse in case the CLI emits structured data.
                if let Ok(event) = serde_json::from_str::<Value>(line.trim())
                    && event.is_object()
                {
                    match event.get("type").and_then(Value::as_str) {
                        Some("system") => {
                            if let Some(sid) = event.get("session_id").and_then(Value::as_str) {
                                session_id = Some(sid.to_string());
                            }
                            continue;
                        }
                        Some("result") => {
                            if let Some(sid) = event.get("session_id").and_then(Value::as_str) {
                                session_id = Some(sid.to_string());
                            }
                            if let Some(text) = event.get("result").and_then(Value::as_str)
                                && !text.is_empty()
                            {
                                accumulated.push(text.to_string());
                            }
                            terminal_seen = true;
                            continue;
                        }
                        _ => {}
                    }
                }

                if !line.trim().is_empty() {
                    accumulated.push(line.clone());
                    emit(callback, StreamUpdate::TextDelta { text: line });
                }
            }
            _ = tokio::time::sleep_until(overall_deadline), if !timed_out && !stalled => {
                timed_out = true;
                warn!(
                    timeout_secs = options.overall_timeout.as_secs(),
                    "overall deadline expired; killing process group"
                );
                kill_process_group(&mut child);
            }
            _ = tokio::time::sleep_until(idle_deadline), if !timed_out && !stalled => {
                stalled = true;
                warn!(
                    idle_secs = options.idle_timeout.as_secs(),
                    "no output within idle deadline; killing process group"
                );
                kill_process_group(&mut child);
            }
        }
    }

    let status = child.wait().await.context("Failed to wait for agent CLI")?;
    let stderr_text = drain_stderr(stderr).await;

    if timed_out {
        return Ok((RawResponse::timeout(), stderr_text));
    }
    if stalled {
        return Ok((RawResponse::stall(session_id), stderr_text));
    }

    let returncode = status.code().unwrap_or_else(|| {
        warn!("process terminated by signal, using exit code 1");
        1
    });
    Ok((
        RawResponse {
            result: accumulated.join("\n"),
            session_id,
            returncode: Some(returncode),
            raw: Value::Object(serde_json::Map::new()),
            ..RawResponse::default()
        },
        stderr_text,
    ))
}

async fn drain_stderr(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut bytes = Vec::new();
    let _ = stderr.read_to_end(&mut bytes).await;
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
