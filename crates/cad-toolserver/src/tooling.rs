//! Tooling-spec model parsed from the caller's TOML configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Tool-server transport declared by a tooling spec.
///
/// Serialized with `#[serde(tag = "type")]` so TOML uses `type = "mcp_local"`
/// or `type = "mcp_remote"`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ToolingTransport {
    /// Spawn a side process speaking stdio.
    #[serde(rename = "mcp_local")]
    Local {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Consult a remote HTTP endpoint.
    #[serde(rename = "mcp_remote")]
    Remote {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

/// One tool-server entry in the caller's tooling file.
///
/// # TOML formats
///
/// **Tagged (canonical):**
/// ```toml
/// [[servers]]
/// type = "mcp_local"
/// command = "npx"
/// args = ["-y", "repomix@latest", "--mcp"]
///
/// [[servers]]
/// type = "mcp_remote"
/// prefix = "deepwiki"
/// url = "https://mcp.deepwiki.com/mcp"
/// ```
///
/// **Legacy (backward-compatible, auto-detected as mcp_local):**
/// ```toml
/// [[servers]]
/// command = "npx"
/// args = ["-y", "repomix@latest", "--mcp"]
/// ```
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolingSpec {
    /// Explicit server name; inferred from the command or URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(flatten)]
    pub transport: ToolingTransport,
}

/// Custom deserializer for backward-compatible spec parsing.
///
/// Handles three cases:
/// 1. Explicit `type` field → deserialize the matching transport variant.
/// 2. No `type` field + has `command` → auto-detect as `mcp_local`.
/// 3. No `type` field + no `command` → error with a helpful message.
impl<'de> Deserialize<'de> for ToolingSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            prefix: Option<String>,
            #[serde(rename = "type")]
            transport_type: Option<String>,
            // Local fields
            command: Option<String>,
            #[serde(default)]
            args: Vec<String>,
            #[serde(default)]
            env: HashMap<String, String>,
            cwd: Option<String>,
            // Remote fields
            url: Option<String>,
            #[serde(default)]
            headers: HashMap<String, String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let label = raw
            .prefix
            .clone()
            .or_else(|| raw.command.clone())
            .or_else(|| raw.url.clone())
            .unwrap_or_else(|| "<unnamed>".to_string());

        let transport = match raw.transport_type.as_deref() {
            Some("mcp_local") => {
                let command = raw.command.ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "server '{label}': type = \"mcp_local\" requires 'command' field"
                    ))
                })?;
                ToolingTransport::Local {
                    command,
                    args: raw.args,
                    env: raw.env,
                    cwd: raw.cwd,
                }
            }
            Some("mcp_remote") => {
                let url = raw.url.ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "server '{label}': type = \"mcp_remote\" requires 'url' field"
                    ))
                })?;
                ToolingTransport::Remote {
                    url,
                    headers: raw.headers,
                }
            }
            Some(other) => {
                return Err(serde::de::Error::custom(format!(
                    "server '{label}': unknown tooling type '{other}' (expected: mcp_local, mcp_remote)"
                )));
            }
            None => {
                // Legacy format: no type field.
                if let Some(command) = raw.command {
                    ToolingTransport::Local {
                        command,
                        args: raw.args,
                        env: raw.env,
                        cwd: raw.cwd,
                    }
                } else {
                    return Err(serde::de::Error::custom(format!(
                        "server '{label}': missing 'type' field; \
                         add type = \"mcp_local\" (with 'command') or \
                         type = \"mcp_remote\" (with 'url')"
                    )));
                }
            }
        };

        Ok(ToolingSpec {
            prefix: raw.prefix,
            transport,
        })
    }
}

/// Top-level tooling file: a list of `[[servers]]` entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolingFile {
    #[serde(default)]
    pub servers: Vec<ToolingSpec>,
}
