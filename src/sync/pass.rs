//! Sequential resolution of a set of dependencies.
//!
//! Both queues resolve their work through a [`PassRunner`]: one dependency
//! at a time, every failure (panics included) recorded and reported without
//! stopping the pass. Only cancellation ends a pass early.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::model::DependencyId;
use crate::report::{ReportEvent, ReportSink};
use crate::resolve::{ResolveError, ResolveOutcome, Resolver};
use crate::source::DeclarationSource;

/// Outcome for one dependency in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyResult {
    pub dependency: DependencyId,
    pub outcome: std::result::Result<ResolveOutcome, ResolveError>,
}

/// Everything one flush or convergence pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Per-dependency outcomes, in resolution order.
    pub results: Vec<DependencyResult>,
    /// Queued identities whose declarations no longer exist.
    pub skipped: Vec<DependencyId>,
}

impl PassReport {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn resolved(&self) -> impl Iterator<Item = &ResolveOutcome> {
        self.results.iter().filter_map(|r| r.outcome.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&DependencyId, &ResolveError)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (&r.dependency, e)))
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Shared collaborators of a queue's processing loop.
#[derive(Clone)]
pub(crate) struct PassRunner {
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) source: Arc<dyn DeclarationSource>,
    pub(crate) sink: Arc<dyn ReportSink>,
}

impl PassRunner {
    /// Every declared dependency the resolver considers stale.
    pub(crate) fn stale_set(&self) -> BTreeSet<DependencyId> {
        self.source
            .dependencies()
            .iter()
            .filter(|dependency| self.resolver.is_stale(dependency))
            .map(|dependency| dependency.id())
            .collect()
    }

    pub(crate) async fn run(
        &self,
        ids: BTreeSet<DependencyId>,
        cancel: &CancellationToken,
    ) -> PassReport {
        let mut report = PassReport::default();
        if ids.is_empty() {
            return report;
        }

        for id in ids {
            if cancel.is_cancelled() {
                debug!("pass cancelled");
                break;
            }
            let Some(dependency) = self.source.dependency(&id) else {
                debug!(dependency = %id, "declaration removed, skipping");
                report.skipped.push(id);
                continue;
            };

            self.sink.report(ReportEvent::ResolutionStarted {
                dependency: id.clone(),
            });
            let outcome = AssertUnwindSafe(self.resolver.resolve(&dependency, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(ResolveError::Panicked {
                        dependency: id.clone(),
                        message: panic_message(payload.as_ref()),
                    })
                });

            match &outcome {
                Ok(resolved) => self.sink.report(ReportEvent::ResolutionSucceeded {
                    dependency: id.clone(),
                    downloaded: resolved.downloaded(),
                    skipped: resolved.skipped,
                }),
                Err(e) => self.sink.report(ReportEvent::ResolutionFailed {
                    dependency: id.clone(),
                    reason: e.to_string(),
                }),
            }
            report.results.push(DependencyResult {
                dependency: id,
                outcome,
            });
        }

        if !report.results.is_empty() {
            self.resolver.finish_run().await;
        }
        info!(
            resolved = report.resolved_count(),
            failed = report.failed_count(),
            skipped = report.skipped.len(),
            "pass finished"
        );
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
