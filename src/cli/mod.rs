//! Command-line interface for artsync.

pub mod args;
mod commands;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::app::{App, AppError};

pub use args::{GlobalArgs, ManifestArgs, OutputSink};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during CLI execution.
#[derive(Debug, Error)]
pub enum CliError {
    /// Argument processing error.
    #[error("{0}")]
    Args(#[from] args::ArgsError),

    /// App error.
    #[error("{0}")]
    App(#[from] AppError),

    /// Manifest error.
    #[error("{0}")]
    Source(#[from] crate::source::SourceError),

    /// Queue error.
    #[error("{0}")]
    Queue(#[from] crate::sync::QueueError),

    /// Download error.
    #[error("{0}")]
    Batch(#[from] crate::fetch::BatchError),

    /// Some dependencies could not be resolved.
    #[error("{failed} of {attempted} dependencies failed to resolve")]
    SyncFailed { failed: usize, attempted: usize },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

// =============================================================================
// CLI Definition
// =============================================================================

/// artsync - keeps declared binary dependencies present in a local cache.
#[derive(Parser, Debug)]
#[command(name = "artsync", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring every declared dependency up to date once.
    Sync(commands::sync::SyncArgs),

    /// Show whether each declared dependency is up to date.
    Status(commands::status::StatusArgs),

    /// Download one file into the primary cache root.
    Fetch(commands::fetch::FetchArgs),

    /// Keep the cache in step with the manifest until interrupted.
    Watch(commands::watch::WatchArgs),
}

// =============================================================================
// CLI Execution
// =============================================================================

impl Cli {
    /// Parse command-line arguments and return the CLI instance.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let app = App::new(self.global.to_app_context())?;

        // Ctrl-C cancels the app scope; commands observe it through their queues.
        let scope = app.scope().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received");
                scope.cancel();
            }
        });

        match self.command {
            Command::Sync(args) => args.run(&app, &self.global).await,
            Command::Status(args) => args.run(&app, &self.global).await,
            Command::Fetch(args) => args.run(&app, &self.global).await,
            Command::Watch(args) => args.run(&app, &self.global).await,
        }
    }
}

/// Install the tracing subscriber. `RUST_LOG` overrides the default filter.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "artifact_sync=debug"
    } else {
        "artifact_sync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Main entry point for the CLI.
pub async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.global.verbose);
    cli.run().await
}
