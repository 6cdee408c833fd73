//! Error types for dependency resolution.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::fetch::BatchError;
use crate::model::{DependencyId, InvalidRelativePath};
use crate::repository::RepositoryId;
use crate::util::LeaderAbandoned;

/// Errors raised while resolving one dependency.
///
/// `Clone` so every caller joined onto one in-flight resolution receives the
/// same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A declared root does not lie under any recognized cache root.
    #[error("{dependency}: root {} is not under any cache root", .path.display())]
    RootOutsideCache {
        dependency: DependencyId,
        path: PathBuf,
    },

    #[error("{dependency}: {source}")]
    InvalidRequest {
        dependency: DependencyId,
        #[source]
        source: InvalidRelativePath,
    },

    #[error("{dependency}: unknown repository '{repository}'")]
    UnknownRepository {
        dependency: DependencyId,
        repository: RepositoryId,
    },

    #[error("{dependency}: no repositories configured")]
    NoRepositories { dependency: DependencyId },

    #[error("{dependency}: {source}")]
    Download {
        dependency: DependencyId,
        #[source]
        source: BatchError,
    },

    #[error("{dependency}: resolution timed out after {after:?}")]
    TimedOut {
        dependency: DependencyId,
        after: Duration,
    },

    #[error("{dependency}: resolution panicked: {message}")]
    Panicked {
        dependency: DependencyId,
        message: String,
    },

    #[error("resolution abandoned before completing")]
    Abandoned,

    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// True for failures caused by declarations or configuration rather than
    /// by the network. These never touch a repository.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ResolveError::RootOutsideCache { .. }
                | ResolveError::InvalidRequest { .. }
                | ResolveError::UnknownRepository { .. }
                | ResolveError::NoRepositories { .. }
        )
    }
}

impl From<LeaderAbandoned> for ResolveError {
    fn from(_: LeaderAbandoned) -> Self {
        ResolveError::Abandoned
    }
}

/// Result type for resolution.
pub type Result<T> = std::result::Result<T, ResolveError>;
