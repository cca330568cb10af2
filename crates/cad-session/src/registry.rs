//! Thread-safe node-to-session bindings with workspace persistence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

/// Keyed store mapping stable node ids to the provider's current session ids.
///
/// Each provider kind owns its own registry instance with its own persistence
/// filename, so two providers running against the same workspace never see
/// each other's bindings.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions_file: String,
    sessions: Mutex<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new(sessions_file: impl Into<String>) -> Self {
        Self {
            sessions_file: sessions_file.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Filename used for persistence under a workspace root.
    pub fn sessions_file(&self) -> &str {
        &self.sessions_file
    }

    // The critical sections are single map operations; a poisoned lock still
    // holds a coherent map, so recover instead of propagating.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, node_id: &str) -> Option<String> {
        self.lock().get(node_id).cloned()
    }

    pub fn set(&self, node_id: &str, session_id: &str) {
        self.lock()
            .insert(node_id.to_string(), session_id.to_string());
    }

    pub fn clear(&self, node_id: &str) {
        self.lock().remove(node_id);
    }

    pub fn clear_all(&self) {
        self.lock().clear();
    }

    /// Copy of the current bindings, for inspection.
    pub fn entries(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    /// Persist the bindings to `{workspace_root}/{sessions_file}`.
    ///
    /// Best-effort: writes only when the map is non-empty; failures are
    /// logged, never raised.
    pub fn save_to_workspace(&self, workspace_root: &Path) {
        let path = workspace_root.join(&self.sessions_file);
        let contents = {
            let sessions = self.lock();
            if sessions.is_empty() {
                return;
            }
            match serde_json::to_string(&*sessions) {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(error = %e, "failed to serialize session bindings");
                    return;
                }
            }
        };
        if let Err(e) = std::fs::write(&path, contents) {
            warn!(path = %path.display(), error = %e, "failed to persist session bindings");
        }
    }

    /// Merge bindings from `{workspace_root}/{sessions_file}` into the map.
    ///
    /// Absent files and malformed contents are tolerated: the map is left
    /// untouched and no error is raised.
    pub fn load_from_workspace(&self, workspace_root: &Path) {
        let path = workspace_root.join(&self.sessions_file);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return;
        };
        let Ok(stored) = serde_json::from_str::<HashMap<String, String>>(&contents) else {
            debug!(path = %path.display(), "ignoring malformed sessions file");
            return;
        };
        self.lock().extend(stored);
    }
}
