//! One convergence pass over the manifest.

use std::sync::Arc;

use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::cli::{CliError, GlobalArgs, ManifestArgs, OutputSink, Result};
use crate::source::ManifestSource;
use crate::sync::PassReport;

/// Arguments for the sync command.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    #[command(flatten)]
    pub output: OutputSink,
}

impl SyncArgs {
    pub async fn run(self, app: &App, global: &GlobalArgs) -> Result<()> {
        let source = Arc::new(ManifestSource::load(&self.manifest.manifest)?);
        let queue = app.tracking_queue(source);
        let report = queue.converge().await?;

        let summary = PassSummary::from_report(&report);
        write_summary(&self.output, &summary, global.json).await?;

        if summary.failed > 0 {
            return Err(CliError::SyncFailed {
                failed: summary.failed,
                attempted: summary.attempted,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Output
// =============================================================================

/// Printable form of a [`PassReport`].
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PassSummary {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failures: Vec<FailureOutput>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FailureOutput {
    pub dependency: String,
    pub scope: String,
    pub error: String,
}

impl PassSummary {
    pub fn from_report(report: &PassReport) -> Self {
        Self {
            attempted: report.attempted(),
            resolved: report.resolved_count(),
            failed: report.failed_count(),
            downloaded: report.resolved().map(|o| o.downloaded()).sum(),
            skipped: report.resolved().map(|o| o.skipped).sum(),
            failures: report
                .failures()
                .map(|(id, error)| FailureOutput {
                    dependency: id.coordinates(),
                    scope: id.scope.clone(),
                    error: error.to_string(),
                })
                .collect(),
        }
    }

    fn to_text(&self) -> String {
        let mut text = format!(
            "{} resolved, {} failed ({} files downloaded, {} already present)",
            self.resolved, self.failed, self.downloaded, self.skipped
        );
        for failure in &self.failures {
            text.push_str(&format!("\n  {}", failure.error));
        }
        text
    }
}

pub(crate) async fn write_summary(
    output: &OutputSink,
    summary: &PassSummary,
    json: bool,
) -> Result<()> {
    if json {
        output.write_json(summary).await?;
    } else {
        output.write_str(&summary.to_text()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedFile;
    use crate::model::DependencyId;
    use crate::resolve::{ResolveError, ResolveOutcome};
    use crate::sync::DependencyResult;
    use std::path::PathBuf;

    fn id(artifact: &str) -> DependencyId {
        DependencyId::new("org.acme", artifact, "1.0", "compile")
    }

    #[test]
    fn summary_counts_downloads_and_failures() {
        let report = PassReport {
            results: vec![
                DependencyResult {
                    dependency: id("lib"),
                    outcome: Ok(ResolveOutcome {
                        dependency: id("lib"),
                        fetched: vec![
                            FetchedFile {
                                path: PathBuf::from("/cache/a.jar"),
                                url: Some("https://repo.example.com/a.jar".to_string()),
                                sha256: "00".to_string(),
                                size: 1,
                            },
                            FetchedFile {
                                path: PathBuf::from("/cache/b.jar"),
                                url: None,
                                sha256: "11".to_string(),
                                size: 1,
                            },
                        ],
                        skipped: 2,
                    }),
                },
                DependencyResult {
                    dependency: id("bad"),
                    outcome: Err(ResolveError::NoRepositories {
                        dependency: id("bad"),
                    }),
                },
            ],
            skipped: Vec::new(),
        };

        let summary = PassSummary::from_report(&report);
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failures[0].dependency, "org.acme:bad:1.0");
        assert!(summary.to_text().contains("no repositories configured"));
    }
}
