//! Ad-hoc download of a single file.

use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::cli::{CliError, GlobalArgs, OutputSink, Result};
use crate::model::RelativePathRequest;
use crate::resolve::Resolver;

/// Arguments for the fetch command.
#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Path of the file relative to the repository root, e.g.
    /// `org/acme/lib/1.0/lib-1.0.jar`.
    pub path: String,

    /// Expected sha256 of the content, in hex.
    #[arg(long)]
    pub sha256: Option<String>,

    /// Fetch only from this configured repository.
    #[arg(long)]
    pub repository: Option<String>,

    #[command(flatten)]
    pub output: OutputSink,
}

#[derive(Debug, Serialize)]
struct FetchOutput {
    path: String,
    url: Option<String>,
    sha256: String,
    size: u64,
}

impl FetchArgs {
    pub async fn run(self, app: &App, global: &GlobalArgs) -> Result<()> {
        let request = RelativePathRequest::new(self.path.as_str(), self.sha256.clone())
            .map_err(|e| CliError::Other(e.to_string()))?;

        let repositories = match &self.repository {
            Some(id) => {
                let repository = app
                    .repositories()
                    .iter()
                    .find(|r| r.id().as_str() == id)
                    .ok_or_else(|| CliError::Other(format!("unknown repository '{}'", id)))?;
                vec![repository.clone()]
            }
            None => app.repositories().to_vec(),
        };

        let root = app.orchestrator().layout().primary().to_path_buf();
        let fetched = app
            .downloader()
            .fetch_all(vec![request], &root, &repositories, app.scope())
            .await?;

        let side_cache = app.orchestrator().side_cache();
        for file in &fetched {
            side_cache.record(file);
        }
        app.orchestrator().finish_run().await;

        let outputs: Vec<FetchOutput> = fetched
            .into_iter()
            .map(|f| FetchOutput {
                path: f.path.display().to_string(),
                url: f.url,
                sha256: f.sha256,
                size: f.size,
            })
            .collect();

        if global.json {
            self.output.write_json(&outputs).await?;
        } else {
            let lines: Vec<String> = outputs
                .iter()
                .map(|o| match &o.url {
                    Some(url) => format!("{} <- {} ({} bytes)", o.path, url, o.size),
                    None => format!("{} (already present)", o.path),
                })
                .collect();
            self.output.write_str(&lines.join("\n")).await?;
        }
        Ok(())
    }
}
