//! The `{mcpServers: …}` document and its temp-file lifecycle.

use std::path::PathBuf;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;

use crate::builder::ServerEntry;

/// Structured tool-server document handed to the agent CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ToolServerDocument {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: IndexMap<String, ServerEntry>,
}

impl ToolServerDocument {
    pub fn new(mcp_servers: IndexMap<String, ServerEntry>) -> Self {
        Self { mcp_servers }
    }
}

/// Write the document to a fresh temp file and return its path.
///
/// The caller owns the file and must delete it on every exit path.
pub fn write_temp_document(document: &ToolServerDocument) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("cad-mcp-")
        .suffix(".json")
        .tempfile()
        .context("Failed to create tool-server config file")?;
    serde_json::to_writer(&mut file, document)
        .context("Failed to write tool-server config file")?;
    let (_file, path) = file
        .keep()
        .context("Failed to persist tool-server config file")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{LocalServer, RemoteServer};
    use std::collections::HashMap;

    fn sample_document() -> ToolServerDocument {
        let mut servers = IndexMap::new();
        servers.insert(
            "local".to_string(),
            ServerEntry::Local(LocalServer {
                command: "srv".to_string(),
                args: vec!["--mcp".to_string()],
                env: HashMap::new(),
                cwd: None,
            }),
        );
        servers.insert(
            "wiki".to_string(),
            ServerEntry::Remote(RemoteServer {
                kind: "http".to_string(),
                url: "https://mcp.example.com/mcp".to_string(),
                headers: HashMap::new(),
            }),
        );
        ToolServerDocument::new(servers)
    }

    #[test]
    fn test_document_shape() {
        let value = serde_json::to_value(sample_document()).expect("serialize");
        assert_eq!(value["mcpServers"]["local"]["command"], "srv");
        assert_eq!(value["mcpServers"]["local"]["args"][0], "--mcp");
        assert!(value["mcpServers"]["local"].get("env").is_none());
        assert_eq!(value["mcpServers"]["wiki"]["type"], "http");
        assert_eq!(
            value["mcpServers"]["wiki"]["url"],
            "https://mcp.example.com/mcp"
        );
    }

    #[test]
    fn test_temp_document_round_trip() {
        let path = write_temp_document(&sample_document()).expect("write");
        let contents = std::fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&contents).expect("parse");
        assert!(value["mcpServers"]["local"].is_object());

        std::fs::remove_file(&path).expect("cleanup");
    }
}
