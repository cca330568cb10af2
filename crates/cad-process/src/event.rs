//! Normalized stream event model shared by all providers.
//!
//! Each agent CLI emits a different NDJSON schema. Providers convert raw
//! events into [`NormalizedEvent`] so the supervisor loop stays
//! provider-agnostic.

use cad_core::types::FileChange;
use serde::Serialize;
use serde_json::Value;

/// Supervisor-level error markers stored in [`RawResponse::error`].
pub const ERROR_TIMEOUT: &str = "timeout";
pub const ERROR_STALL: &str = "stall";

/// Kind of a normalized stream event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Init,
    Text,
    ToolStart,
    ToolEnd,
    Result,
    Error,
}

/// Provider-agnostic view of one NDJSON stream event.
#[derive(Clone, Debug)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub session_id: Option<String>,
    pub text: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_result: Option<String>,
    pub tool_id: Option<String>,
    pub result_text: Option<String>,
    pub usage: Option<Value>,
    /// The raw event as received, kept for terminal-response assembly.
    pub raw: Value,
}

impl NormalizedEvent {
    fn base(kind: EventKind, raw: &Value) -> Self {
        Self {
            kind,
            session_id: None,
            text: None,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            tool_id: None,
            result_text: None,
            usage: None,
            raw: raw.clone(),
        }
    }

    pub fn init(session_id: Option<String>, raw: &Value) -> Self {
        Self {
            session_id,
            ..Self::base(EventKind::Init, raw)
        }
    }

    pub fn text(text: impl Into<String>, raw: &Value) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::base(EventKind::Text, raw)
        }
    }

    /// Text event with empty content; never resets the idle deadline.
    pub fn empty_text(raw: &Value) -> Self {
        Self::base(EventKind::Text, raw)
    }

    pub fn tool_start(
        tool_name: impl Into<String>,
        tool_input: Value,
        tool_id: Option<String>,
        raw: &Value,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            tool_input: Some(tool_input),
            tool_id,
            ..Self::base(EventKind::ToolStart, raw)
        }
    }

    pub fn tool_end(tool_result: Option<String>, tool_id: Option<String>, raw: &Value) -> Self {
        Self {
            tool_result,
            tool_id,
            ..Self::base(EventKind::ToolEnd, raw)
        }
    }

    pub fn result(
        session_id: Option<String>,
        result_text: Option<String>,
        usage: Option<Value>,
        raw: &Value,
    ) -> Self {
        Self {
            session_id,
            result_text,
            usage,
            ..Self::base(EventKind::Result, raw)
        }
    }

    pub fn error(text: impl Into<String>, raw: &Value) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::base(EventKind::Error, raw)
        }
    }
}

/// Event delivered to the caller's streaming callback.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamUpdate {
    TextDelta {
        text: String,
    },
    ToolStart {
        name: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolEnd {
        name: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    StallDetected {
        session_id: String,
        /// Idle deadline in seconds that triggered the stall.
        idle_timeout: u64,
    },
}

/// Caller-supplied streaming callback.
pub type StreamCallback = dyn Fn(StreamUpdate) + Send + Sync;

/// Terminal response of one supervised run.
///
/// `error` holds [`ERROR_TIMEOUT`], [`ERROR_STALL`], or an error string the
/// CLI itself reported in its terminal event.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RawResponse {
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "_returncode", skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_changes: Vec<FileChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(rename = "_streamed", skip_serializing_if = "std::ops::Not::not")]
    pub streamed: bool,
    /// Raw terminal event; an empty object when the response was synthesized.
    #[serde(skip)]
    pub raw: Value,
}

impl RawResponse {
    pub fn timeout() -> Self {
        Self {
            error: Some(ERROR_TIMEOUT.to_string()),
            raw: Value::Object(serde_json::Map::new()),
            ..Self::default()
        }
    }

    pub fn stall(session_id: Option<String>) -> Self {
        Self {
            error: Some(ERROR_STALL.to_string()),
            session_id,
            raw: Value::Object(serde_json::Map::new()),
            ..Self::default()
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(ERROR_TIMEOUT)
    }

    pub fn is_stall(&self) -> bool {
        self.error.as_deref() == Some(ERROR_STALL)
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// True when the CLI rejected the session id it was asked to resume.
    pub fn is_resume_rejected(&self) -> bool {
        self.error.as_deref().is_some_and(|e| {
            let lower = e.to_lowercase();
            !lower.is_empty() && (lower.contains("session") || lower.contains("resume"))
        })
    }
}
