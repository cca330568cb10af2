//! Tool-server config lifecycle for one call.
//!
//! The guard owns whichever artifact was created (temp file or workspace
//! settings install) and undoes it on drop, so every exit path of the
//! orchestrator cleans up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cad_toolserver::{
    ReporterContext, SettingsHandle, ToolServerDocument, ToolingSpec, build_server_map,
    install_settings, write_temp_document,
};
use tracing::warn;

#[derive(Debug)]
pub(crate) enum ConfigGuard {
    TempFile { path: PathBuf },
    Settings(SettingsHandle),
}

impl ConfigGuard {
    /// Path to pass on the command line; `None` for the settings variant.
    pub(crate) fn flag_path(&self) -> Option<&Path> {
        match self {
            Self::TempFile { path } => Some(path),
            Self::Settings(_) => None,
        }
    }
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        match self {
            Self::TempFile { path } => {
                if path.exists()
                    && let Err(e) = std::fs::remove_file(&*path)
                {
                    warn!(path = %path.display(), error = %e,
                        "failed to delete tool-server config file");
                }
            }
            Self::Settings(handle) => handle.restore(),
        }
    }
}

/// Build the tool-server config for one call, or `None` when no servers
/// resolve.
///
/// The environment for `$ENV{…}` interpolation is the process environment
/// plus `WORKSPACE_ROOT`. Failures are logged and degrade to running without
/// tool servers; they never abort the call.
pub(crate) fn create_config(
    settings_dir: Option<&str>,
    node_id: &str,
    progress_session_id: &str,
    server_port: u16,
    tooling: &[ToolingSpec],
    workspace_root: Option<&Path>,
) -> Option<ConfigGuard> {
    let mut env_map: HashMap<String, String> = std::env::vars().collect();
    if let Some(root) = workspace_root {
        env_map.insert("WORKSPACE_ROOT".to_string(), root.display().to_string());
    }

    let reporter = ReporterContext {
        node_id,
        session_id: progress_session_id,
        server_port,
    };
    let servers = build_server_map(tooling, &env_map, Some(&reporter));
    if servers.is_empty() {
        return None;
    }

    match (settings_dir, workspace_root) {
        (Some(dir), Some(root)) => match install_settings(root, dir, &servers) {
            Ok(handle) => Some(ConfigGuard::Settings(handle)),
            Err(e) => {
                warn!(error = %e, "failed to install settings file; continuing without tool servers");
                None
            }
        },
        _ => match write_temp_document(&ToolServerDocument::new(servers)) {
            Ok(path) => Some(ConfigGuard::TempFile { path }),
            Err(e) => {
                warn!(error = %e, "failed to write tool-server config; continuing without tool servers");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cad_toolserver::ToolingTransport;

    fn local_spec(command: &str) -> ToolingSpec {
        ToolingSpec {
            prefix: None,
            transport: ToolingTransport::Local {
                command: command.to_string(),
                args: Vec::new(),
                env: HashMap::new(),
                cwd: None,
            },
        }
    }

    #[test]
    fn test_no_servers_yields_no_config() {
        assert!(create_config(None, "node", "", 8000, &[], None).is_none());
    }

    #[test]
    fn test_temp_file_guard_deletes_on_drop() {
        let guard = create_config(None, "node", "", 8000, &[local_spec("srv")], None)
            .expect("config created");
        let path = guard.flag_path().expect("temp file path").to_path_buf();
        assert!(path.exists());

        drop(guard);
        assert!(!path.exists(), "config file must not survive the call");
    }

    #[test]
    fn test_reporter_alone_is_enough_for_a_config() {
        let guard =
            create_config(None, "node", "progress-session", 8000, &[], None).expect("config");
        let path = guard.flag_path().expect("path").to_path_buf();
        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.contains("cad-reporter"));
        assert!(contents.contains("progress-session"));
    }

    #[test]
    fn test_settings_variant_installs_into_workspace() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let guard = create_config(
            Some(".gemini"),
            "node",
            "",
            8000,
            &[local_spec("srv")],
            Some(workspace.path()),
        )
        .expect("config");

        assert!(guard.flag_path().is_none(), "settings variant has no flag path");
        let settings = workspace.path().join(".gemini").join("settings.json");
        assert!(settings.exists());

        drop(guard);
        assert!(!settings.exists());
        assert!(!workspace.path().join(".gemini").exists());
    }

    #[test]
    fn test_settings_variant_without_workspace_falls_back_to_temp_file() {
        let guard = create_config(Some(".gemini"), "node", "", 8000, &[local_spec("srv")], None)
            .expect("config");
        assert!(guard.flag_path().is_some());
    }
}
