//! Provider enum for the supported agent CLIs.

use std::path::Path;

use cad_core::types::{ProviderKind, TokenUsage};
use cad_process::{NormalizedEvent, RawResponse};
use serde_json::Value;
use tokio::process::Command;

/// How the CLI streams its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamFlavor {
    /// One JSON event per stdout line.
    Ndjson,
    /// Unstructured text; file changes are detected by workspace diffing.
    PlainText,
}

/// Provider: closed enum for the supported agent CLIs.
///
/// Uses the data-enum pattern (not trait objects) for a fixed set of tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    ClaudeCode { model: Option<String> },
    GeminiCli { model: Option<String> },
    CopilotCli { model: Option<String> },
}

impl Provider {
    pub fn new(kind: ProviderKind, model: Option<String>) -> Self {
        match kind {
            ProviderKind::ClaudeCode => Self::ClaudeCode { model },
            ProviderKind::GeminiCli => Self::GeminiCli { model },
            ProviderKind::CopilotCli => Self::CopilotCli { model },
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::ClaudeCode { .. } => ProviderKind::ClaudeCode,
            Self::GeminiCli { .. } => ProviderKind::GeminiCli,
            Self::CopilotCli { .. } => ProviderKind::CopilotCli,
        }
    }

    /// Registry tag; also the token-accounting partition key.
    pub fn provider_tag(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Executable name looked up on PATH.
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::ClaudeCode { .. } => "claude",
            Self::GeminiCli { .. } => "gemini",
            Self::CopilotCli { .. } => "copilot",
        }
    }

    /// Absolute locations searched when the binary is not on PATH.
    pub fn fallback_paths(&self) -> &'static [&'static str] {
        match self {
            Self::ClaudeCode { .. } => &[
                "/usr/local/bin/claude",
                "/opt/homebrew/bin/claude",
                "~/.local/bin/claude",
            ],
            Self::GeminiCli { .. } => &[
                "/usr/local/bin/gemini",
                "/opt/homebrew/bin/gemini",
                "~/.local/bin/gemini",
            ],
            Self::CopilotCli { .. } => &[
                "/usr/local/bin/copilot",
                "/opt/homebrew/bin/copilot",
                "~/.local/bin/copilot",
            ],
        }
    }

    /// Per-provider filename for persisted session bindings.
    pub fn sessions_file(&self) -> &'static str {
        match self {
            Self::ClaudeCode { .. } => ".claude_sessions.json",
            Self::GeminiCli { .. } => ".gemini_sessions.json",
            Self::CopilotCli { .. } => ".copilot_sessions.json",
        }
    }

    pub fn stream_flavor(&self) -> StreamFlavor {
        match self {
            Self::CopilotCli { .. } => StreamFlavor::PlainText,
            _ => StreamFlavor::Ndjson,
        }
    }

    /// Directory under the workspace for the settings-file config variant.
    ///
    /// `None` means the CLI takes the config file path on its command line.
    pub fn settings_dir(&self) -> Option<&'static str> {
        match self {
            Self::GeminiCli { .. } => Some(".gemini"),
            _ => None,
        }
    }

    pub fn model_name(&self) -> Option<&str> {
        match self {
            Self::ClaudeCode { model } | Self::GeminiCli { model } | Self::CopilotCli { model } => {
                model.as_deref()
            }
        }
    }

    /// Map the configured model name to the CLI's `--model` value.
    pub fn resolve_model_flag(&self) -> Option<String> {
        let name = self.model_name().unwrap_or_default().trim().to_lowercase();
        match self {
            Self::ClaudeCode { .. } => {
                if name.is_empty() || name == "claude" || name == "default" {
                    return None;
                }
                for family in ["opus", "sonnet", "haiku"] {
                    if name.contains(family) {
                        return Some(family.to_string());
                    }
                }
                Some(name)
            }
            Self::GeminiCli { .. } => {
                if name.is_empty() || name == "gemini" || name == "default" {
                    None
                } else {
                    // gemini CLI accepts full model IDs directly
                    Some(name)
                }
            }
            Self::CopilotCli { .. } => {
                if name.is_empty() || name == "copilot" || name == "default" {
                    None
                } else {
                    Some(name)
                }
            }
        }
    }

    /// Build the argv for a fresh or resumed call.
    ///
    /// The prompt always travels as a single argv element behind the CLI's
    /// non-interactive flag; tool use is auto-approved.
    pub fn build_command(
        &self,
        binary: &Path,
        prompt: &str,
        session_id: Option<&str>,
        config_path: Option<&Path>,
        max_turns: u32,
    ) -> Command {
        let mut cmd = Command::new(binary);
        match self {
            Self::ClaudeCode { .. } => {
                cmd.arg("-p").arg(prompt);
                cmd.arg("--output-format").arg("stream-json");
                cmd.arg("--verbose");
                cmd.arg("--dangerously-skip-permissions");
                if let Some(sid) = session_id {
                    cmd.arg("--resume").arg(sid);
                }
                cmd.arg("--max-turns").arg(max_turns.to_string());
                if let Some(path) = config_path {
                    cmd.arg("--mcp-config").arg(path);
                }
            }
            Self::GeminiCli { .. } => {
                cmd.arg("-p").arg(prompt);
                cmd.arg("--output-format").arg("stream-json");
                // Non-interactive auto-approve all tool calls
                cmd.arg("--approval-mode").arg("yolo");
                if let Some(sid) = session_id {
                    cmd.arg("--resume").arg(sid);
                }
                // gemini has no turn-limit flag; tool servers come from the
                // workspace settings file rather than the command line.
            }
            Self::CopilotCli { .. } => {
                cmd.arg("-p").arg(prompt);
                cmd.arg("--yolo");
                if let Some(sid) = session_id {
                    cmd.arg("--resume").arg(sid);
                }
                if let Some(path) = config_path {
                    // copilot requires the @ prefix for file paths
                    cmd.arg("--additional-mcp-config")
                        .arg(format!("@{}", path.display()));
                }
            }
        }
        if let Some(flag) = self.resolve_model_flag() {
            cmd.arg("--model").arg(flag);
        }
        cmd
    }

    /// Build the argv for resuming after a stall or for the completion pass.
    pub fn build_resume_command(
        &self,
        binary: &Path,
        session_id: &str,
        prompt: &str,
        config_path: Option<&Path>,
        max_turns: u32,
    ) -> Command {
        self.build_command(binary, prompt, Some(session_id), config_path, max_turns)
    }

    /// Convert a raw NDJSON event into the provider-agnostic form.
    pub fn normalize_event(&self, raw: &Value) -> NormalizedEvent {
        match self {
            Self::ClaudeCode { .. } => crate::events::normalize_claude_event(raw),
            Self::GeminiCli { .. } => crate::events::normalize_gemini_event(raw),
            Self::CopilotCli { .. } => crate::events::normalize_copilot_event(raw),
        }
    }

    /// Extract token usage from the terminal event of a run.
    pub fn extract_token_usage(&self, response: &RawResponse) -> TokenUsage {
        match self {
            Self::ClaudeCode { .. } => crate::usage::claude_token_usage(response),
            Self::GeminiCli { .. } => crate::usage::gemini_token_usage(response),
            // copilot does not expose token usage in non-interactive mode
            Self::CopilotCli { .. } => TokenUsage::default(),
        }
    }
}

#[cfg(test)]
#[path = "provider_cmd_tests.rs"]
mod cmd_tests;
