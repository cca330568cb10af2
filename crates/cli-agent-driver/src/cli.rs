//! Command-line interface definitions.

use cad_core::types::ProviderKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cli-agent-driver",
    about = "Drive agentic CLI tools as supervised, session-aware subprocesses",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute one supervised model call
    Run {
        /// Agent CLI to drive
        #[arg(long, value_enum)]
        tool: ProviderKind,

        /// User prompt
        #[arg(long)]
        prompt: String,

        /// Optional system instructions
        #[arg(long)]
        system: Option<String>,

        /// Workspace directory (created if missing, snapshotted around the call)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Stable node id for session continuity
        #[arg(long, default_value = "cli")]
        node_id: String,

        /// Model name forwarded to the CLI
        #[arg(long)]
        model: Option<String>,

        /// Turn limit override
        #[arg(long)]
        max_turns: Option<u32>,

        /// Overall deadline in seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,

        /// Idle deadline in seconds
        #[arg(long, default_value_t = 900)]
        idle_timeout: u64,

        /// Tooling file declaring tool servers ([[servers]] TOML)
        #[arg(long)]
        servers: Option<PathBuf>,

        /// Progress endpoint port for the built-in reporter
        #[arg(long, default_value_t = 8000)]
        port: u16,

        /// Progress session id; empty disables the built-in reporter
        #[arg(long, default_value = "")]
        progress_session: String,

        /// Echo stream events to stderr as they arrive
        #[arg(long)]
        stream: bool,
    },

    /// Inspect or clear persisted session bindings for a workspace
    Sessions {
        #[arg(long, value_enum)]
        tool: ProviderKind,

        #[arg(long)]
        workspace: PathBuf,

        /// Remove the bindings file instead of printing it
        #[arg(long)]
        clear: bool,
    },
}
