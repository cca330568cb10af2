#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("{binary} CLI not found. Install it or ensure '{binary}' is in PATH")]
    BinaryMissing { binary: String },

    #[error("Unknown provider '{0}'. Valid values: claude-code, gemini-cli, copilot-cli")]
    UnknownProvider(String),
}
