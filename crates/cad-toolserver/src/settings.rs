//! Workspace settings-file variant for CLIs that read tool-server
//! configuration from a settings file instead of a command-line flag.
//!
//! The server map is merged into `{workspace}/<dir>/settings.json`; any prior
//! file is backed up first and restored byte-for-byte on cleanup. Concurrent
//! calls targeting different workspaces never interfere because every path
//! here is workspace-scoped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::builder::ServerEntry;

pub const SETTINGS_FILE: &str = "settings.json";
pub const SETTINGS_BACKUP_SUFFIX: &str = "cad-backup";

/// Handle to an installed settings file; restores the prior state on
/// [`SettingsHandle::restore`].
#[derive(Debug)]
pub struct SettingsHandle {
    dir: PathBuf,
    settings_path: PathBuf,
    backup_path: PathBuf,
}

impl SettingsHandle {
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Undo the install: put the backup back byte-for-byte, or remove the
    /// file (and the directory, if now empty) when there was none.
    pub fn restore(&self) {
        if self.backup_path.is_file() {
            if let Err(e) = std::fs::rename(&self.backup_path, &self.settings_path) {
                warn!(path = %self.settings_path.display(), error = %e,
                    "failed to restore settings backup");
            }
            return;
        }
        if self.settings_path.exists()
            && let Err(e) = std::fs::remove_file(&self.settings_path)
        {
            warn!(path = %self.settings_path.display(), error = %e,
                "failed to remove installed settings file");
        }
        // Prune the directory only when nothing else lives in it.
        let _ = std::fs::remove_dir(&self.dir);
    }
}

/// Merge `servers` into `{workspace_root}/{provider_dir}/settings.json`.
///
/// Unrelated keys in an existing file are preserved; the `mcpServers` key is
/// overwritten. The prior file, if any, is copied aside first so `restore`
/// can put it back exactly.
pub fn install_settings(
    workspace_root: &Path,
    provider_dir: &str,
    servers: &IndexMap<String, ServerEntry>,
) -> Result<SettingsHandle> {
    let dir = workspace_root.join(provider_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create settings directory: {}", dir.display()))?;
    let settings_path = dir.join(SETTINGS_FILE);
    let backup_path = dir.join(format!("{SETTINGS_FILE}.{SETTINGS_BACKUP_SUFFIX}"));

    let mut document = if settings_path.is_file() {
        std::fs::copy(&settings_path, &backup_path)
            .with_context(|| format!("Failed to back up {}", settings_path.display()))?;
        std::fs::read_to_string(&settings_path)
            .ok()
            .and_then(|contents| serde_json::from_str::<Value>(&contents).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    } else {
        Value::Object(serde_json::Map::new())
    };

    document["mcpServers"] =
        serde_json::to_value(servers).context("Failed to serialize server map")?;
    let contents =
        serde_json::to_string_pretty(&document).context("Failed to serialize settings")?;
    std::fs::write(&settings_path, contents)
        .with_context(|| format!("Failed to write {}", settings_path.display()))?;

    Ok(SettingsHandle {
        dir,
        settings_path,
        backup_path,
    })
}
