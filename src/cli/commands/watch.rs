//! Continuous synchronization driven by manifest changes.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use super::sync::{write_summary, PassSummary};
use crate::app::App;
use crate::cli::args::parse_duration_arg;
use crate::cli::{GlobalArgs, ManifestArgs, OutputSink, Result};
use crate::source::ManifestSource;
use crate::sync::QueueError;

/// Arguments for the watch command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// How often to re-read the manifest.
    #[arg(long, default_value = "5s", value_parser = parse_duration_arg)]
    pub interval: Duration,

    #[command(flatten)]
    pub output: OutputSink,
}

impl WatchArgs {
    pub async fn run(self, app: &App, global: &GlobalArgs) -> Result<()> {
        let source = Arc::new(ManifestSource::load(&self.manifest.manifest)?);
        let queue = app.sync_queue(source.clone());
        let scope = app.scope().clone();

        info!(manifest = %self.manifest.manifest.display(), "watching");
        match queue.resync_all_and_wait().await {
            Ok(report) => {
                write_summary(&self.output, &PassSummary::from_report(&report), global.json)
                    .await?
            }
            Err(QueueError::Cancelled) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let events = match source.reload() {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "manifest reload failed; keeping previous declarations");
                    continue;
                }
            };
            if events.is_empty() {
                continue;
            }

            info!(changes = events.len(), "manifest changed");
            for event in &events {
                queue.apply_event(event)?;
            }
            match queue.flush_and_wait().await {
                Ok(report) => {
                    write_summary(&self.output, &PassSummary::from_report(&report), global.json)
                        .await?
                }
                Err(QueueError::Cancelled) => break,
                Err(e) => return Err(e.into()),
            }
        }

        queue.cancel();
        queue.closed().await;
        Ok(())
    }
}
