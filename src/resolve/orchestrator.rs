//! Resolving one dependency into verified files in the local cache.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{ResolveError, Result};
use super::layout::CacheLayout;
use super::side_cache::SideCache;
use super::staleness;
use crate::fetch::{BatchDownloader, BatchError, FetchedFile};
use crate::model::{Dependency, DependencyId, RelativePathRequest};
use crate::report::{FileSystemNotifier, NoopNotifier};
use crate::repository::RepositoryDescriptor;
use crate::util::Dedup;

/// The seam between the sync loops and the work of resolving a dependency.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Whether `dependency` needs resolving during a full resync.
    fn is_stale(&self, dependency: &Dependency) -> bool;

    async fn resolve(
        &self,
        dependency: &Dependency,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome>;

    /// Called once at the end of a flush or pass that resolved anything.
    async fn finish_run(&self) {}
}

/// What one successful resolution did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub dependency: DependencyId,
    /// Files now present and verified, downloaded or not.
    pub fetched: Vec<FetchedFile>,
    /// Roots skipped because they were already present.
    pub skipped: usize,
}

impl ResolveOutcome {
    pub fn downloaded(&self) -> usize {
        self.fetched.iter().filter(|f| f.was_downloaded()).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Attach declared sha256 records to fetches of fixed versions.
    pub verify_checksums: bool,
    /// Overall cap on one dependency's resolution.
    pub timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Files to fetch for one dependency, grouped by cache root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub batches: BTreeMap<PathBuf, Vec<RelativePathRequest>>,
    pub skipped: usize,
}

impl ResolutionPlan {
    pub fn request_count(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.request_count() == 0
    }
}

/// Resolves dependencies through a [`BatchDownloader`], at most once at a
/// time per dependency identity.
///
/// Callers joined onto one resolution may come from different cancellation
/// scopes. Each caller stops waiting as soon as its own scope is cancelled.
/// If the run it joined is cancelled by another scope, a caller whose scope
/// is still live starts the resolution again.
pub struct ResolutionOrchestrator {
    downloader: BatchDownloader,
    layout: CacheLayout,
    repositories: Vec<RepositoryDescriptor>,
    settings: OrchestratorSettings,
    notifier: Arc<dyn FileSystemNotifier>,
    side_cache: Arc<SideCache>,
    in_flight: Dedup<DependencyId, ResolveOutcome, ResolveError>,
}

impl ResolutionOrchestrator {
    pub fn new(
        downloader: BatchDownloader,
        layout: CacheLayout,
        repositories: Vec<RepositoryDescriptor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            downloader,
            layout,
            repositories,
            settings,
            notifier: Arc::new(NoopNotifier),
            side_cache: Arc::new(SideCache::in_memory()),
            in_flight: Dedup::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FileSystemNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_side_cache(mut self, side_cache: Arc<SideCache>) -> Self {
        self.side_cache = side_cache;
        self
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn repositories(&self) -> &[RepositoryDescriptor] {
        &self.repositories
    }

    pub fn side_cache(&self) -> &Arc<SideCache> {
        &self.side_cache
    }

    /// Number of dependencies currently being resolved.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.in_flight_count()
    }

    /// The repositories `dependency` may be fetched from, in order.
    pub fn repositories_for(&self, dependency: &Dependency) -> Result<Vec<RepositoryDescriptor>> {
        let repositories: Vec<RepositoryDescriptor> = match &dependency.repository {
            Some(bound) => {
                let repository = self
                    .repositories
                    .iter()
                    .find(|r| r.id() == bound)
                    .ok_or_else(|| ResolveError::UnknownRepository {
                        dependency: dependency.id(),
                        repository: bound.clone(),
                    })?;
                vec![repository.clone()]
            }
            None => self.repositories.clone(),
        };
        if repositories.is_empty() {
            return Err(ResolveError::NoRepositories {
                dependency: dependency.id(),
            });
        }
        Ok(repositories)
    }

    /// Build the per-root list of files to fetch.
    ///
    /// Fails without touching the network if a root lies outside every cache
    /// root. For fixed versions, a root that exists and has no checksum to
    /// enforce is skipped, as is a checksummed root whose side-cache record
    /// still matches. Unfixed versions fetch every root, unverified.
    pub fn plan(&self, dependency: &Dependency) -> Result<ResolutionPlan> {
        let fixed = dependency.has_fixed_version();
        let verify = fixed && self.settings.verify_checksums;

        let mut batches: BTreeMap<PathBuf, BTreeSet<RelativePathRequest>> = BTreeMap::new();
        let mut skipped = 0;
        for (_, path) in dependency.all_roots() {
            let (root, relative) =
                self.layout
                    .locate(path)
                    .ok_or_else(|| ResolveError::RootOutsideCache {
                        dependency: dependency.id(),
                        path: path.clone(),
                    })?;
            let invalid = |source| ResolveError::InvalidRequest {
                dependency: dependency.id(),
                source,
            };

            let mut request = RelativePathRequest::from_path(relative, None).map_err(invalid)?;
            if verify {
                if let Some(sha256) = dependency.checksum_for(request.path()) {
                    request = RelativePathRequest::new(request.path(), Some(sha256.to_string()))
                        .map_err(invalid)?;
                }
            }

            if fixed {
                let present = match request.sha256() {
                    None => path.is_file(),
                    Some(sha256) => self.side_cache.matches(path, sha256),
                };
                if present {
                    skipped += 1;
                    continue;
                }
            }
            batches.entry(root.to_path_buf()).or_default().insert(request);
        }

        Ok(ResolutionPlan {
            batches: batches
                .into_iter()
                .map(|(root, requests)| (root, requests.into_iter().collect()))
                .collect(),
            skipped,
        })
    }

    async fn run(&self, dependency: &Dependency, cancel: &CancellationToken) -> Result<ResolveOutcome> {
        let id = dependency.id();
        let repositories = self.repositories_for(dependency)?;
        let plan = self.plan(dependency)?;
        let skipped = plan.skipped;
        if plan.is_empty() {
            debug!(dependency = %id, skipped, "nothing to fetch");
            return Ok(ResolveOutcome {
                dependency: id,
                fetched: Vec::new(),
                skipped,
            });
        }

        let total = plan.request_count();
        let batches = plan.batches;
        let downloader = &self.downloader;
        // Filled as files land, so a timeout still sees what completed.
        let completed: Mutex<Vec<FetchedFile>> = Mutex::new(Vec::new());
        let record = |file: &FetchedFile| {
            completed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(file.clone());
        };
        let work = async {
            let mut failures = Vec::new();
            for (root, requests) in batches {
                if let Err(error) = downloader
                    .fetch_all_observed(requests, &root, &repositories, cancel, &record)
                    .await
                {
                    failures.extend_from_slice(error.failures());
                }
            }
            failures
        };

        let result = tokio::time::timeout(self.settings.timeout, work).await;
        let fetched = completed
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        self.publish(&fetched);

        let failures = match result {
            Ok(failures) => failures,
            Err(_) => {
                warn!(
                    dependency = %id,
                    timeout = ?self.settings.timeout,
                    completed = fetched.len(),
                    "resolution timed out"
                );
                return Err(ResolveError::TimedOut {
                    dependency: id,
                    after: self.settings.timeout,
                });
            }
        };
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        match BatchError::new(total, failures, fetched.clone()) {
            Some(error) => Err(ResolveError::Download {
                dependency: id,
                source: error,
            }),
            None => Ok(ResolveOutcome {
                dependency: id,
                fetched,
                skipped,
            }),
        }
    }

    /// Record fetched files and announce the newly written ones.
    fn publish(&self, fetched: &[FetchedFile]) {
        for file in fetched {
            self.side_cache.record(file);
        }
        let written: Vec<PathBuf> = fetched
            .iter()
            .filter(|f| f.was_downloaded())
            .map(|f| f.path.clone())
            .collect();
        if !written.is_empty() {
            self.notifier.refresh(&written);
        }
    }
}

#[async_trait]
impl Resolver for ResolutionOrchestrator {
    fn is_stale(&self, dependency: &Dependency) -> bool {
        staleness::is_stale(dependency)
    }

    async fn resolve(
        &self,
        dependency: &Dependency,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome> {
        let id = dependency.id();
        loop {
            if self.in_flight.is_in_flight(&id) {
                debug!(dependency = %id, "joining in-flight resolution");
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                result = self.in_flight.call(id.clone(), || self.run(dependency, cancel)) => result,
            };
            match result {
                // The run we joined was stopped by another caller's scope.
                Err(ResolveError::Cancelled | ResolveError::Abandoned) if !cancel.is_cancelled() => {
                    debug!(dependency = %id, "joined resolution was cancelled, retrying");
                }
                other => return other,
            }
        }
    }

    async fn finish_run(&self) {
        let side_cache = Arc::clone(&self.side_cache);
        match tokio::task::spawn_blocking(move || side_cache.save()).await {
            Ok(Ok(true)) => debug!("side cache saved"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to save side cache"),
            Err(e) => warn!(error = %e, "side cache save task failed"),
        }
    }
}
