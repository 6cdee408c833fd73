//! Resolver and sink doubles for queue tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::{Dependency, DependencyId};
use crate::report::{ReportEvent, ReportSink};
use crate::resolve::{ResolveError, ResolveOutcome, Resolver};
use crate::source::ManifestSource;

/// Records every resolution. Artifacts named `bad*` fail, `boom` panics.
pub(crate) struct RecordingResolver {
    calls: Mutex<Vec<DependencyId>>,
    finished_runs: AtomicUsize,
    delay: Duration,
    stale: bool,
}

impl RecordingResolver {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            finished_runs: AtomicUsize::new(0),
            delay: Duration::ZERO,
            stale: true,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_stale(mut self, stale: bool) -> Self {
        self.stale = stale;
        self
    }

    pub(crate) fn calls(&self) -> Vec<DependencyId> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn finished_runs(&self) -> usize {
        self.finished_runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for RecordingResolver {
    fn is_stale(&self, _dependency: &Dependency) -> bool {
        self.stale
    }

    async fn resolve(
        &self,
        dependency: &Dependency,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome, ResolveError> {
        self.calls.lock().unwrap().push(dependency.id());
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        if dependency.artifact == "boom" {
            panic!("boom");
        }
        if dependency.artifact.starts_with("bad") {
            return Err(ResolveError::NoRepositories {
                dependency: dependency.id(),
            });
        }
        Ok(ResolveOutcome {
            dependency: dependency.id(),
            fetched: Vec::new(),
            skipped: 0,
        })
    }

    async fn finish_run(&self) {
        self.finished_runs.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingSink {
    fn report(&self, event: ReportEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub(crate) fn dependency(artifact: &str) -> Dependency {
    Dependency::new("org.acme", artifact, "1.0")
}

pub(crate) fn source(artifacts: &[&str]) -> Arc<ManifestSource> {
    Arc::new(
        ManifestSource::from_dependencies(artifacts.iter().map(|a| dependency(a)).collect())
            .unwrap(),
    )
}
