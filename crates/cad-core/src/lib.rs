//! Shared vocabulary for the agent-CLI driver: provider kinds, conversation
//! messages, tool specs, token usage, file changes, and typed errors.

pub mod error;
pub mod types;
