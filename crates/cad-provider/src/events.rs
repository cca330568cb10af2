//! Per-provider NDJSON event normalization.

use cad_process::{NormalizedEvent, TOOL_RESULT_DISPLAY_CHARS, truncate_display};
use serde_json::Value;

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Stringify a tool-result value: strings pass through, anything else is
/// serialized and bounded for display.
fn tool_result_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => truncate_display(&other.to_string(), TOOL_RESULT_DISPLAY_CHARS),
    }
}

/// Normalize claude-code events.
///
/// claude nests content blocks inside `assistant` and `user` message
/// wrappers, unlike gemini's flat event types. The first meaningful block in
/// a message wins; empty wrappers normalize to an empty text event, which
/// never feeds the idle deadline.
pub(crate) fn normalize_claude_event(raw: &Value) -> NormalizedEvent {
    match raw.get("type").and_then(Value::as_str) {
        Some("system") => NormalizedEvent::init(str_field(raw, "session_id"), raw),
        Some("assistant") => {
            let blocks = raw
                .pointer("/message/content")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        return NormalizedEvent::tool_start(
                            block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown"),
                            block
                                .get("input")
                                .cloned()
                                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                            str_field(block, "id"),
                            raw,
                        );
                    }
                    Some("text") => {
                        let text = block.get("text").and_then(Value::as_str).unwrap_or("");
                        if !text.is_empty() {
                            return NormalizedEvent::text(text, raw);
                        }
                    }
                    _ => {}
                }
            }
            NormalizedEvent::empty_text(raw)
        }
        Some("user") => {
            let blocks = raw
                .pointer("/message/content")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("tool_result") {
                    let content = block.get("content").unwrap_or(&Value::Null);
                    return NormalizedEvent::tool_end(Some(tool_result_string(content)), None, raw);
                }
            }
            NormalizedEvent::empty_text(raw)
        }
        Some("result") => NormalizedEvent::result(
            str_field(raw, "session_id"),
            str_field(raw, "result"),
            raw.get("usage").cloned(),
            raw,
        ),
        _ => NormalizedEvent::empty_text(raw),
    }
}

/// Normalize gemini-cli events.
///
/// gemini uses flat top-level event types (`init`, `message`, `tool_use`,
/// `tool_result`, `error`, `result`).
pub(crate) fn normalize_gemini_event(raw: &Value) -> NormalizedEvent {
    match raw.get("type").and_then(Value::as_str) {
        Some("init") => NormalizedEvent::init(str_field(raw, "session_id"), raw),
        Some("message") => {
            let role = raw.get("role").and_then(Value::as_str).unwrap_or("");
            let content = raw.get("content").and_then(Value::as_str).unwrap_or("");
            if role == "assistant" && !content.is_empty() {
                NormalizedEvent::text(content, raw)
            } else {
                // user messages and empty assistant messages are noise
                NormalizedEvent::empty_text(raw)
            }
        }
        Some("tool_use") => NormalizedEvent::tool_start(
            raw.get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
            raw.get("parameters")
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            str_field(raw, "tool_id"),
            raw,
        ),
        Some("tool_result") => {
            let output = raw.get("output").unwrap_or(&Value::Null);
            NormalizedEvent::tool_end(
                Some(tool_result_string(output)),
                str_field(raw, "tool_id"),
                raw,
            )
        }
        Some("result") => NormalizedEvent::result(
            str_field(raw, "session_id"),
            str_field(raw, "content"),
            raw.get("stats").cloned(),
            raw,
        ),
        Some("error") => NormalizedEvent::error(
            str_field(raw, "message")
                .or_else(|| str_field(raw, "error"))
                .unwrap_or_default(),
            raw,
        ),
        _ => NormalizedEvent::empty_text(raw),
    }
}

/// Normalize copilot-cli events.
///
/// copilot emits plain text in non-interactive mode, so most lines never
/// reach this function; it covers the case of a future version emitting
/// structured events.
pub(crate) fn normalize_copilot_event(raw: &Value) -> NormalizedEvent {
    match raw.get("type").and_then(Value::as_str) {
        Some("result") => NormalizedEvent::result(
            str_field(raw, "session_id"),
            str_field(raw, "result"),
            raw.get("usage").cloned(),
            raw,
        ),
        Some("system") => NormalizedEvent::init(str_field(raw, "session_id"), raw),
        // unknown JSON event, surface it as text
        _ => NormalizedEvent::text(raw.to_string(), raw),
    }
}
