//! Download many relative paths from an ordered list of repositories.
//!
//! Each request runs as its own task and holds one unit of the shared
//! download pool while it works, so the number of concurrent transfers is
//! bounded across every batch that shares the pool. A failing request never
//! stops the others; all outcomes are collected and reported together.
//!
//! For each request the repositories are tried in order. A 404, a 401, any
//! other client error or an exhausted transient failure moves on to the next
//! repository. An integrity failure, a local I/O error or cancellation stops
//! that request immediately.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::{HeaderMap, AUTHORIZATION};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::content_fetcher::{ContentFetcher, FetchRequest, FetchedFile};
use super::error::{BatchError, FetchError, FetchFailure};
use super::policy::RetryPolicy;
use crate::model::RelativePathRequest;
use crate::repository::{CredentialResolver, RepositoryDescriptor};
use crate::util::CapacityManager;

/// A repository paired with the headers to send to it.
#[derive(Debug, Clone)]
struct Target {
    repository: RepositoryDescriptor,
    headers: HeaderMap,
}

/// Runs batches of fetches against a shared, bounded download pool.
#[derive(Clone)]
pub struct BatchDownloader {
    fetcher: Arc<ContentFetcher>,
    pool: CapacityManager,
    credentials: Arc<dyn CredentialResolver>,
    retry: RetryPolicy,
}

impl BatchDownloader {
    pub fn new(
        fetcher: ContentFetcher,
        pool: CapacityManager,
        credentials: Arc<dyn CredentialResolver>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            pool,
            credentials,
            retry,
        }
    }

    /// The pool that bounds concurrent transfers.
    pub fn pool(&self) -> &CapacityManager {
        &self.pool
    }

    /// Fetch every request into `local_root`.
    ///
    /// Returns all fetched files in request order, or a [`BatchError`]
    /// carrying every failure along with the files that did succeed. An
    /// empty request list succeeds immediately.
    pub async fn fetch_all(
        &self,
        requests: Vec<RelativePathRequest>,
        local_root: &Path,
        repositories: &[RepositoryDescriptor],
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedFile>, BatchError> {
        self.fetch_all_observed(requests, local_root, repositories, cancel, &|_| {})
            .await
    }

    /// Like [`fetch_all`](Self::fetch_all), calling `on_fetched` for each
    /// file as soon as it is in place, in completion order.
    pub async fn fetch_all_observed(
        &self,
        requests: Vec<RelativePathRequest>,
        local_root: &Path,
        repositories: &[RepositoryDescriptor],
        cancel: &CancellationToken,
        on_fetched: &(dyn Fn(&FetchedFile) + Sync),
    ) -> Result<Vec<FetchedFile>, BatchError> {
        let total = requests.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let targets: Arc<Vec<Target>> = Arc::new(
            repositories
                .iter()
                .map(|repository| Target {
                    headers: self.headers_for(repository),
                    repository: repository.clone(),
                })
                .collect(),
        );

        let paths: Vec<String> = requests.iter().map(|r| r.path().to_string()).collect();
        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::new();
        for (index, request) in requests.into_iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let pool = self.pool.clone();
            let targets = targets.clone();
            let retry = self.retry.clone();
            let cancel = cancel.clone();
            let root = local_root.to_path_buf();

            let handle = tasks.spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(FetchError::Cancelled),
                    _permit = pool.use_capacity(1) => {
                        fetch_one(&fetcher, &request, &root, &targets, &retry, &cancel).await
                    }
                };
                (index, result)
            });
            spawned.insert(handle.id(), index);
        }

        let mut fetched = Vec::with_capacity(total);
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(file))) => {
                    on_fetched(&file);
                    fetched.push((index, file));
                }
                Ok((index, Err(error))) => {
                    let path = paths[index].clone();
                    failures.push((index, FetchFailure { path, error }));
                }
                Err(join_error) => {
                    let index = spawned.get(&join_error.id()).copied().unwrap_or(usize::MAX);
                    let path = paths.get(index).cloned().unwrap_or_default();
                    failures.push((
                        index,
                        FetchFailure {
                            path,
                            error: FetchError::Internal {
                                message: join_error.to_string(),
                            },
                        },
                    ));
                }
            }
        }

        fetched.sort_by_key(|(index, _)| *index);
        failures.sort_by_key(|(index, _)| *index);
        let fetched: Vec<FetchedFile> = fetched.into_iter().map(|(_, file)| file).collect();
        let failures: Vec<FetchFailure> = failures.into_iter().map(|(_, failure)| failure).collect();

        match BatchError::new(total, failures, fetched.clone()) {
            Some(error) => {
                warn!(
                    failed = error.failures().len(),
                    total,
                    first = %error.first(),
                    "batch download incomplete"
                );
                Err(error)
            }
            None => Ok(fetched),
        }
    }

    fn headers_for(&self, repository: &RepositoryDescriptor) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !repository.is_private() {
            return headers;
        }
        match self
            .credentials
            .resolve(repository)
            .and_then(|credentials| credentials.authorization_header())
        {
            Some(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            None => debug!(repository = %repository.id(), "no credentials for private repository"),
        }
        headers
    }
}

/// Fetch one request, falling through the repositories in order.
async fn fetch_one(
    fetcher: &ContentFetcher,
    request: &RelativePathRequest,
    root: &Path,
    targets: &[Target],
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<FetchedFile, FetchError> {
    if targets.is_empty() {
        return Err(FetchError::NoRepositories {
            path: request.path().to_string(),
        });
    }

    let local: PathBuf = request.local_path(root);
    let mut not_found = 0;
    let mut unauthorized = 0;
    let mut last_error = None;

    for target in targets {
        let url = target.repository.file_url(request.path());
        let fetch = FetchRequest::new(&url, &local)
            .with_headers(target.headers.clone())
            .with_sha256(request.sha256());

        match fetcher.fetch(fetch, retry, cancel).await {
            Ok(file) => return Ok(file),
            Err(e) if e.is_terminal() => return Err(e),
            Err(FetchError::NotFound { .. }) => {
                debug!(repository = %target.repository.id(), path = request.path(), "not found");
                not_found += 1;
            }
            Err(FetchError::Unauthorized { .. }) => {
                debug!(repository = %target.repository.id(), path = request.path(), "unauthorized");
                unauthorized += 1;
            }
            Err(e) => {
                debug!(repository = %target.repository.id(), error = %e, "trying next repository");
                last_error = Some(e);
            }
        }
    }

    if unauthorized > 0 {
        return Err(FetchError::UnauthorizedInRepositories {
            path: request.path().to_string(),
            repositories: unauthorized,
        });
    }
    match last_error {
        Some(e) if not_found < targets.len() => Err(e),
        _ => Err(FetchError::NotFoundInAnyRepository {
            path: request.path().to_string(),
            repositories: targets.len(),
        }),
    }
}
