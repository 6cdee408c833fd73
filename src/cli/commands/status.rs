//! Staleness of every declared dependency.

use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::cli::{GlobalArgs, ManifestArgs, OutputSink, Result};
use crate::resolve::{staleness, Staleness};
use crate::source::{DeclarationSource, ManifestSource};

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// Only list dependencies that need resolving.
    #[arg(long)]
    pub stale_only: bool,

    #[command(flatten)]
    pub output: OutputSink,
}

#[derive(Debug, Serialize)]
struct StatusEntry {
    dependency: String,
    scope: String,
    stale: bool,
    status: String,
    missing: Vec<String>,
}

impl StatusArgs {
    pub async fn run(self, _app: &App, global: &GlobalArgs) -> Result<()> {
        let source = ManifestSource::load(&self.manifest.manifest)?;

        let entries: Vec<StatusEntry> = source
            .dependencies()
            .iter()
            .map(|dependency| {
                let state = staleness(dependency);
                let missing = match &state {
                    Staleness::MissingRoots { missing, .. } => missing
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                    _ => Vec::new(),
                };
                StatusEntry {
                    dependency: dependency.id().coordinates(),
                    scope: dependency.scope.clone(),
                    stale: state.is_stale(),
                    status: state.to_string(),
                    missing,
                }
            })
            .filter(|entry| entry.stale || !self.stale_only)
            .collect();

        if global.json {
            self.output.write_json(&entries).await?;
        } else {
            let lines: Vec<String> = entries
                .iter()
                .map(|e| format!("{} ({}): {}", e.dependency, e.scope, e.status))
                .collect();
            self.output.write_str(&lines.join("\n")).await?;
        }
        Ok(())
    }
}
