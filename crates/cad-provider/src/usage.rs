//! Token-usage extraction and the external accounting seam.

use std::collections::HashMap;
use std::sync::Mutex;

use cad_core::types::TokenUsage;
use cad_process::RawResponse;
use serde_json::Value;

/// External accumulator for per-call token usage, keyed by
/// `(node_id, model_name, provider_tag)`.
pub trait UsageSink: Send + Sync {
    fn record(&self, node_id: &str, model_name: &str, provider_tag: &str, usage: TokenUsage);
}

/// In-memory [`UsageSink`] that sums counters per key.
#[derive(Debug, Default)]
pub struct UsageLedger {
    entries: Mutex<HashMap<(String, String, String), TokenUsage>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the accumulated usage per `(node_id, model_name, provider_tag)`.
    pub fn totals(&self) -> HashMap<(String, String, String), TokenUsage> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl UsageSink for UsageLedger {
    fn record(&self, node_id: &str, model_name: &str, provider_tag: &str, usage: TokenUsage) {
        let key = (
            node_id.to_string(),
            model_name.to_string(),
            provider_tag.to_string(),
        );
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(key).or_default();
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.total_tokens += usage.total_tokens;
        entry.metadata.extend(usage.metadata);
    }
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Extract claude-code usage from the terminal result event.
///
/// Prefers the top-level `usage` counters; falls back to the first
/// `modelUsage` entry when `usage` carries no input count. The cost figure
/// rides along in metadata.
pub(crate) fn claude_token_usage(response: &RawResponse) -> TokenUsage {
    let raw = &response.raw;
    if !raw.is_object() {
        return TokenUsage::default();
    }

    let cost = raw
        .get("total_cost_usd")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let usage = raw.get("usage").cloned().unwrap_or(Value::Null);

    if u64_field(&usage, "input_tokens") == 0
        && let Some(model_usage) = raw.get("modelUsage").and_then(Value::as_object)
        && let Some((_, stats)) = model_usage.iter().next()
    {
        let input_tokens = u64_field(stats, "inputTokens");
        let output_tokens = u64_field(stats, "outputTokens");
        let mut metadata = serde_json::Map::new();
        metadata.insert("total_cost_usd".to_string(), cost.into());
        if let Some(stats) = stats.as_object() {
            metadata.extend(stats.clone());
        }
        return TokenUsage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            metadata,
        };
    }

    let input_tokens = u64_field(&usage, "input_tokens");
    let output_tokens = u64_field(&usage, "output_tokens");
    let mut metadata = serde_json::Map::new();
    metadata.insert("total_cost_usd".to_string(), cost.into());
    TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens + output_tokens,
        metadata,
    }
}

/// Extract gemini-cli usage from the terminal `stats` block (with a `usage`
/// fallback).
pub(crate) fn gemini_token_usage(response: &RawResponse) -> TokenUsage {
    let raw = &response.raw;
    if !raw.is_object() {
        return TokenUsage::default();
    }

    let stats = match raw.get("stats") {
        Some(stats) if stats.is_object() => stats.clone(),
        _ => raw.get("usage").cloned().unwrap_or(Value::Null),
    };

    let input_tokens = u64_field(&stats, "input_tokens");
    let output_tokens = u64_field(&stats, "output_tokens");
    let total_tokens = stats
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(input_tokens + output_tokens);
    let metadata = stats
        .as_object()
        .cloned()
        .unwrap_or_else(serde_json::Map::new);

    TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens,
        metadata,
    }
}
