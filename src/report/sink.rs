use tracing::{error, info};

use crate::model::DependencyId;

/// A progress or outcome message for one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    ResolutionStarted {
        dependency: DependencyId,
    },
    ResolutionSucceeded {
        dependency: DependencyId,
        downloaded: usize,
        skipped: usize,
    },
    ResolutionFailed {
        dependency: DependencyId,
        reason: String,
    },
}

/// Receives structured progress messages from the sync loops.
///
/// Sinks are informational only; nothing a sink does affects resolution.
pub trait ReportSink: Send + Sync {
    fn report(&self, event: ReportEvent);
}

/// Writes report events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn report(&self, event: ReportEvent) {
        match event {
            ReportEvent::ResolutionStarted { dependency } => {
                info!(
                    dependency = %dependency.coordinates(),
                    scope = %dependency.scope,
                    "resolving"
                );
            }
            ReportEvent::ResolutionSucceeded {
                dependency,
                downloaded,
                skipped,
            } => {
                info!(
                    dependency = %dependency.coordinates(),
                    scope = %dependency.scope,
                    downloaded,
                    skipped,
                    "resolved"
                );
            }
            ReportEvent::ResolutionFailed { dependency, reason } => {
                error!(
                    dependency = %dependency.coordinates(),
                    scope = %dependency.scope,
                    "resolution failed: {}",
                    reason
                );
            }
        }
    }
}
