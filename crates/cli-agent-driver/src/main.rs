use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

mod cli;

use cad_core::types::{Message, ProviderKind};
use cad_provider::{AgentDriver, CallOptions, DriverConfig, Provider, UsageLedger, UsageSink};
use cad_session::SessionRegistry;
use cad_toolserver::{ToolingFile, ToolingSpec};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (output to stderr, initialize only once)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            tool,
            prompt,
            system,
            workspace,
            node_id,
            model,
            max_turns,
            timeout,
            idle_timeout,
            servers,
            port,
            progress_session,
            stream,
        } => {
            let tooling = match &servers {
                Some(path) => load_tooling(path)?,
                None => Vec::new(),
            };

            let provider = Provider::new(tool, model);
            let registry = Arc::new(SessionRegistry::new(provider.sessions_file()));
            if let Some(root) = &workspace {
                registry.load_from_workspace(root);
            }

            let ledger = Arc::new(UsageLedger::new());
            let driver = AgentDriver::new(
                provider,
                DriverConfig {
                    node_id,
                    workspace_root: workspace,
                    max_turns,
                    tooling,
                },
                registry,
            )?
            .with_usage_sink(Arc::clone(&ledger) as Arc<dyn UsageSink>);

            let mut conversation = Vec::new();
            if let Some(system) = system {
                conversation.push(Message::system(system));
            }
            conversation.push(Message::user(prompt));

            let printer = |update: cad_provider::StreamUpdate| {
                if let Ok(line) = serde_json::to_string(&update) {
                    eprintln!("{line}");
                }
            };
            let callback: Option<&cad_provider::StreamCallback> =
                if stream { Some(&printer) } else { None };

            let opts = CallOptions {
                timeout: Duration::from_secs(timeout),
                idle_timeout: Duration::from_secs(idle_timeout),
                progress_session_id: progress_session,
                server_port: port,
            };

            let response = driver
                .call_model(&conversation, &[], callback, &opts)
                .await?;

            println!("{}", response.message.content);

            if !response.raw.file_changes.is_empty() {
                eprintln!("{} file change(s):", response.raw.file_changes.len());
                for change in &response.raw.file_changes {
                    eprintln!("  {:?} {} ({} bytes)", change.change, change.path, change.size);
                }
            }
            for ((node, model, provider_tag), usage) in ledger.totals() {
                eprintln!(
                    "tokens[{node}/{model}/{provider_tag}]: in={} out={} total={}",
                    usage.input_tokens, usage.output_tokens, usage.total_tokens
                );
            }
            Ok(())
        }

        Commands::Sessions {
            tool,
            workspace,
            clear,
        } => sessions_command(tool, &workspace, clear),
    }
}

fn load_tooling(path: &Path) -> Result<Vec<ToolingSpec>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tooling file: {}", path.display()))?;
    let file: ToolingFile = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse tooling file: {}", path.display()))?;
    Ok(file.servers)
}

fn sessions_command(tool: ProviderKind, workspace: &Path, clear: bool) -> Result<()> {
    let provider = Provider::new(tool, None);
    let path = workspace.join(provider.sessions_file());
    if clear {
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            println!("cleared {}", path.display());
        } else {
            println!("no sessions file at {}", path.display());
        }
        return Ok(());
    }

    let registry = SessionRegistry::new(provider.sessions_file());
    registry.load_from_workspace(workspace);
    let entries = registry.entries();
    if entries.is_empty() {
        println!("no sessions for {} in {}", provider.provider_tag(), workspace.display());
    } else {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }
    Ok(())
}
