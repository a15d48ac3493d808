use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::error::PipelineResult;
use crate::core::state::AppState;
use crate::core::transfer::TransferManager;

#[derive(Debug, Parser)]
#[command(name = "interface-modpacks")]
#[command(version, about = "Analyze, download and install Minecraft modpacks")]
pub struct Cli {
    /// Data directory override
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Write the session log to <data-dir>/logs on exit
    #[arg(long, global = true)]
    pub save_log: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print metadata for a modpack URL or archive
    Analyze { source: String },

    /// List the instances that can host a modpack
    Check { source: String },

    /// Import a modpack into a new instance, or an existing one with --instance
    Import {
        source: String,

        /// Existing instance id
        #[arg(long)]
        instance: Option<String>,

        /// Install even if the instance runs a different version or loader
        #[arg(long)]
        allow_incompatible: bool,
    },

    /// Continue an interrupted import
    Resume { id: String },

    /// List interrupted imports
    Pending,

    /// Create a temporary share link for a pack file or folder
    Share { path: PathBuf },

    /// List instances
    Instances,

    /// Print the pipeline settings
    Settings {
        /// Also write them to pipeline_settings.json for editing
        #[arg(long)]
        write: bool,
    },
}

pub async fn execute(cli: Cli) -> PipelineResult<()> {
    let state = AppState::new(cli.data_dir).await?;
    let result = dispatch(&state, cli.command).await;

    if cli.save_log {
        match state.hub.save_logs_to_file(&state.logs_dir()).await {
            Ok(path) => info!("Session log written to {:?}", path),
            Err(e) => warn!("Could not write session log: {}", e),
        }
    }
    result
}

async fn dispatch(state: &AppState, command: Commands) -> PipelineResult<()> {
    let orchestrator = &state.orchestrator;

    match command {
        Commands::Analyze { source } => print_json(&orchestrator.analyze(&source).await?),
        Commands::Check { source } => {
            let metadata = orchestrator.analyze(&source).await?;
            print_json(&orchestrator.check_compatibility(&metadata).await?)
        }
        Commands::Import {
            source,
            instance,
            allow_incompatible,
        } => {
            let _interrupt = InterruptGuard::cancel_transfers(Arc::clone(&state.transfers));
            let outcome = match instance {
                Some(id) => orchestrator.import_into(&source, &id, allow_incompatible).await?,
                None => {
                    let metadata = orchestrator.analyze(&source).await?;
                    orchestrator.import_and_create(&source, metadata).await?
                }
            };
            print_json(&outcome)
        }
        Commands::Resume { id } => {
            let _interrupt = InterruptGuard::cancel_transfers(Arc::clone(&state.transfers));
            print_json(&orchestrator.resume(&id).await?)
        }
        Commands::Pending => print_json(&orchestrator.incomplete_imports()),
        Commands::Share { path } => {
            state.shares.cleanup_expired().await?;
            print_json(&state.shares.create(&path).await?)
        }
        Commands::Instances => print_json(&state.instances.list().await?),
        Commands::Settings { write } => {
            if write {
                state.save_settings()?;
                info!("Settings written to {:?}", state.data_dir);
            }
            print_json(&state.settings)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> PipelineResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancels all transfers on Ctrl-C for as long as it is alive, leaving
/// their records resumable.
struct InterruptGuard(JoinHandle<()>);

impl InterruptGuard {
    fn cancel_transfers(transfers: Arc<TransferManager>) -> Self {
        Self(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping transfers");
                transfers.cancel_all();
            }
        }))
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
