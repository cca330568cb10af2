//! The per-call orchestration pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cad_core::error::DriverError;
use cad_core::types::{Message, ToolSpec};
use cad_process::{
    RawResponse, StreamCallback, StreamUpdate, SuperviseOptions, run_plain_text, run_streaming,
    truncate_display,
};
use cad_session::SessionRegistry;
use cad_toolserver::ToolingSpec;
use tracing::{debug, info, warn};

use crate::config::{ConfigGuard, create_config};
use crate::discovery::find_binary;
use crate::provider::{Provider, StreamFlavor};
use crate::usage::UsageSink;

const STALL_RESUME_PROMPT: &str = "Your previous session was interrupted due to inactivity. \
     Continue where you left off and complete your remaining work.";

const COMPLETION_RESUME_PROMPT: &str = "Your previous response was incomplete — you ran out of turns before \
     writing your deliverable. Please write your COMPLETE deliverable now. \
     Do NOT do any more research or tool calls. Use the knowledge you already \
     gathered to produce your full output document immediately.";

/// Results shorter than this on a fresh call trigger the completion resume.
const COMPLETION_MIN_CHARS: usize = 1000;

const FRESH_MAX_TURNS: u32 = 30;
const CONTINUATION_MAX_TURNS: u32 = 40;
const RESUME_MAX_TURNS: u32 = 20;

const STDERR_DISPLAY_CHARS: usize = 500;

/// Per-driver configuration supplied by the upstream engine.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Stable identifier for the logical conversation slot.
    pub node_id: String,
    /// Workspace the agent works in; created on demand, snapshotted around
    /// each run.
    pub workspace_root: Option<PathBuf>,
    /// Turn limit override; defaults depend on fresh vs continuation.
    pub max_turns: Option<u32>,
    /// Tool-server declarations forwarded to the agent CLI.
    pub tooling: Vec<ToolingSpec>,
}

/// Per-call knobs.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Overall wall-clock deadline.
    pub timeout: Duration,
    /// Idle deadline, reset by meaningful output.
    pub idle_timeout: Duration,
    /// Session id the built-in progress reporter reports into; empty
    /// disables the reporter.
    pub progress_session_id: String,
    /// Port of the progress endpoint on localhost.
    pub server_port: u16,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(cad_process::DEFAULT_OVERALL_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(cad_process::DEFAULT_IDLE_TIMEOUT_SECS),
            progress_session_id: String::new(),
            server_port: 8000,
        }
    }
}

/// Final answer of one `call_model` invocation.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Assistant-role message; errors surface here as bracketed text.
    pub message: Message,
    pub raw: RawResponse,
}

/// One provider bound to a node: the unit that executes model calls.
pub struct AgentDriver {
    provider: Provider,
    binary_path: PathBuf,
    config: DriverConfig,
    registry: Arc<SessionRegistry>,
    usage_sink: Option<Arc<dyn UsageSink>>,
}

impl AgentDriver {
    /// Resolve the CLI binary and bind the driver to its registry partition.
    pub fn new(
        provider: Provider,
        config: DriverConfig,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self, DriverError> {
        let binary_path = find_binary(&provider)?;
        Ok(Self::with_binary(provider, config, registry, binary_path))
    }

    /// Bind to an explicit binary path, skipping discovery.
    pub fn with_binary(
        provider: Provider,
        config: DriverConfig,
        registry: Arc<SessionRegistry>,
        binary_path: PathBuf,
    ) -> Self {
        Self {
            provider,
            binary_path,
            config,
            registry,
            usage_sink: None,
        }
    }

    /// Forward per-run token usage to an external accumulator.
    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Execute one model call: build the prompt and config, supervise the
    /// CLI, recover from stalls and rejected resumes, diff the workspace,
    /// and update the session registry.
    ///
    /// Errors surface as bracketed assistant messages; an `Err` return means
    /// the child could not be spawned or awaited at all.
    pub async fn call_model(
        &self,
        conversation: &[Message],
        tool_specs: &[ToolSpec],
        callback: Option<&StreamCallback>,
        opts: &CallOptions,
    ) -> Result<ModelResponse> {
        let node_id = self.config.node_id.as_str();
        let existing_session = self.registry.get(node_id);
        let is_continuation = existing_session.is_some();

        // The guard deletes the temp file or restores the settings file when
        // this function returns, on every path.
        let config_guard: Option<ConfigGuard> = create_config(
            self.provider.settings_dir(),
            node_id,
            &opts.progress_session_id,
            opts.server_port,
            &self.config.tooling,
            self.config.workspace_root.as_deref(),
        );
        let config_path = config_guard.as_ref().and_then(ConfigGuard::flag_path);

        let prompt = crate::prompt::build_prompt(
            conversation,
            tool_specs,
            is_continuation,
            self.config.workspace_root.as_deref(),
        );

        let max_turns = self.config.max_turns.unwrap_or(if is_continuation {
            CONTINUATION_MAX_TURNS
        } else {
            FRESH_MAX_TURNS
        });

        let cwd = match &self.config.workspace_root {
            Some(root) => {
                std::fs::create_dir_all(root).with_context(|| {
                    format!("Failed to create workspace: {}", root.display())
                })?;
                Some(root.clone())
            }
            None => None,
        };
        let before = cwd.as_deref().map(cad_workspace::snapshot);

        info!(
            provider = self.provider.provider_tag(),
            node_id,
            is_continuation,
            max_turns,
            "invoking agent CLI"
        );

        let cmd = self.provider.build_command(
            &self.binary_path,
            &prompt,
            existing_session.as_deref(),
            config_path,
            max_turns,
        );
        let (mut raw, mut stderr_text) = self.run(cmd, cwd.as_deref(), opts, callback).await?;

        if raw.is_timeout() {
            if !is_continuation {
                self.registry.clear(node_id);
            }
            return Ok(self.error_response(
                format!("[Error: {} CLI timed out]", self.provider.binary_name()),
                raw,
            ));
        }

        if raw.is_stall() {
            let stall_session = raw
                .session_id
                .clone()
                .or_else(|| self.registry.get(node_id));
            match stall_session {
                Some(session_id) => {
                    warn!(session_id = %session_id, "agent stalled; attempting resume");
                    if let Some(cb) = callback {
                        cb(StreamUpdate::StallDetected {
                            session_id: session_id.clone(),
                            idle_timeout: opts.idle_timeout.as_secs(),
                        });
                    }
                    let resume_cmd = self.provider.build_resume_command(
                        &self.binary_path,
                        &session_id,
                        STALL_RESUME_PROMPT,
                        config_path,
                        self.config.max_turns.unwrap_or(RESUME_MAX_TURNS),
                    );
                    (raw, stderr_text) = self.run(resume_cmd, cwd.as_deref(), opts, callback).await?;
                    if raw.is_timeout() || raw.is_stall() {
                        self.registry.clear(node_id);
                        return Ok(self.error_response(
                            "[Error: Agent stalled and recovery failed]".to_string(),
                            raw,
                        ));
                    }
                }
                None => {
                    return Ok(self.error_response(
                        "[Error: Agent stalled, no session to resume]".to_string(),
                        raw,
                    ));
                }
            }
        }

        self.record_usage(&raw);

        // The child rejected the stored session id: forget it and retry the
        // same call fresh, once.
        if is_continuation && raw.is_resume_rejected() {
            warn!(
                error = raw.error.as_deref().unwrap_or_default(),
                "stored session rejected; retrying without resume"
            );
            self.registry.clear(node_id);
            let retry_cmd = self.provider.build_command(
                &self.binary_path,
                &prompt,
                None,
                config_path,
                self.config.max_turns.unwrap_or(FRESH_MAX_TURNS),
            );
            (raw, stderr_text) = self.run(retry_cmd, cwd.as_deref(), opts, callback).await?;
            if raw.is_timeout() {
                return Ok(self.error_response(
                    format!(
                        "[Error: {} CLI timed out on retry]",
                        self.provider.binary_name()
                    ),
                    raw,
                ));
            }
            self.record_usage(&raw);
        }

        if let (Some(cwd), Some(before)) = (cwd.as_deref(), before.as_ref()) {
            let after = cad_workspace::snapshot(cwd);
            raw.file_changes = cad_workspace::diff(before, &after);
        }

        if callback.is_some() {
            raw.streamed = true;
        }

        let new_session = raw.session_id.clone();
        if let Some(session_id) = &new_session {
            self.registry.set(node_id, session_id);
            if let Some(cwd) = cwd.as_deref() {
                self.registry.save_to_workspace(cwd);
            }
        }

        // Output validation: a suspiciously short result on a fresh call
        // usually means the agent ran out of turns before writing its
        // deliverable. Resume once and ask for the full output.
        let resume_session = new_session.or_else(|| self.registry.get(node_id));
        if let Some(session_id) = resume_session
            && !is_continuation
            && !raw.has_error()
            && raw.result.chars().count() < COMPLETION_MIN_CHARS
        {
            debug!(
                session_id = %session_id,
                result_chars = raw.result.chars().count(),
                "short result on fresh call; resuming for completion"
            );
            let completion_cmd = self.provider.build_resume_command(
                &self.binary_path,
                &session_id,
                COMPLETION_RESUME_PROMPT,
                config_path,
                self.config.max_turns.unwrap_or(RESUME_MAX_TURNS),
            );
            (raw, stderr_text) = self.run(completion_cmd, cwd.as_deref(), opts, callback).await?;
            self.record_usage(&raw);
            if let Some(updated) = raw.session_id.clone() {
                self.registry.set(node_id, &updated);
            }
        }

        Ok(self.stream_response(raw, &stderr_text))
    }

    async fn run(
        &self,
        cmd: tokio::process::Command,
        cwd: Option<&Path>,
        opts: &CallOptions,
        callback: Option<&StreamCallback>,
    ) -> Result<(RawResponse, String)> {
        let options = SuperviseOptions {
            overall_timeout: opts.timeout,
            idle_timeout: opts.idle_timeout,
        };
        match self.provider.stream_flavor() {
            StreamFlavor::Ndjson => {
                let normalize = |raw: &serde_json::Value| self.provider.normalize_event(raw);
                run_streaming(cmd, cwd, options, &normalize, callback).await
            }
            StreamFlavor::PlainText => run_plain_text(cmd, cwd, options, callback).await,
        }
    }

    fn record_usage(&self, raw: &RawResponse) {
        let Some(sink) = &self.usage_sink else {
            return;
        };
        let usage = self.provider.extract_token_usage(raw);
        sink.record(
            &self.config.node_id,
            self.provider.model_name().unwrap_or("default"),
            self.provider.provider_tag(),
            usage,
        );
    }

    fn error_response(&self, content: String, raw: RawResponse) -> ModelResponse {
        ModelResponse {
            message: Message::assistant(content),
            raw,
        }
    }

    /// Final response: the result text, or a stderr-derived error message
    /// when the run produced nothing.
    fn stream_response(&self, raw: RawResponse, stderr_text: &str) -> ModelResponse {
        let mut content = raw.result.clone();
        if content.is_empty() && !stderr_text.is_empty() {
            content = format!(
                "[{} Error]: {}",
                self.provider.binary_name(),
                truncate_display(stderr_text, STDERR_DISPLAY_CHARS)
            );
        }
        ModelResponse {
            message: Message::assistant(content),
            raw,
        }
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
