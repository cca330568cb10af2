//! Tool-server configuration: tooling specs, `$ENV{NAME}` interpolation,
//! collision-free naming, and the `{mcpServers: …}` document handed to agent
//! CLIs via a temp file or a workspace settings file.

mod builder;
mod document;
mod settings;
mod tooling;

pub use builder::{
    LocalServer, REPORTER_NAME, RemoteServer, ReporterContext, ServerEntry, build_server_map,
};
pub use document::{ToolServerDocument, write_temp_document};
pub use settings::{SETTINGS_BACKUP_SUFFIX, SETTINGS_FILE, SettingsHandle, install_settings};
pub use tooling::{ToolingFile, ToolingSpec, ToolingTransport};
