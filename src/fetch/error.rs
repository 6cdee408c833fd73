//! Error types for fetch operations.

use std::path::PathBuf;

use thiserror::Error;

use super::FetchedFile;

/// Errors raised while fetching one file.
///
/// Values are `Clone` so a single failed resolution can be handed to every
/// caller that joined it; foreign errors are captured as their message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The URL does not use an encrypted scheme while secure transport is enforced.
    #[error("refusing to fetch {url}: secure transport is required")]
    InsecureUrl { url: String },

    #[error("invalid url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("{url}: not found")]
    NotFound { url: String },

    #[error("{url}: unauthorized")]
    Unauthorized { url: String },

    #[error("{url}: unexpected status {status}")]
    Status { url: String, status: u16 },

    /// Connection, timeout or body read failure.
    #[error("{url}: {message}")]
    Transport { url: String, message: String },

    #[error("{url}: response has no content length")]
    MissingContentLength { url: String },

    #[error("{url}: unsupported content encoding '{encoding}'")]
    UnsupportedEncoding { url: String, encoding: String },

    #[error("{url}: expected {expected} bytes, received {actual}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error(
        "sha256 mismatch for {}: expected {expected}, actual {actual} ({size} bytes)",
        .path.display()
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
        size: u64,
    },

    #[error("I/O error at {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("{path}: not found in any of {repositories} repositories")]
    NotFoundInAnyRepository { path: String, repositories: usize },

    #[error("{path}: unauthorized in {repositories} repositories")]
    UnauthorizedInRepositories { path: String, repositories: usize },

    #[error("{path}: no repositories to fetch from")]
    NoRepositories { path: String },

    #[error("download task failed: {message}")]
    Internal { message: String },

    #[error("download cancelled")]
    Cancelled,
}

impl FetchError {
    pub(crate) fn transport(url: &str, error: reqwest::Error) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// True for failures worth repeating against the same URL.
    ///
    /// Transport failures and non-4xx statuses are retryable. 4xx responses
    /// (401 included), integrity failures and local errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => !(400..500).contains(status),
            _ => false,
        }
    }

    /// True for checksum and byte-count failures.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            FetchError::ChecksumMismatch { .. } | FetchError::SizeMismatch { .. }
        )
    }

    /// True if trying another repository cannot help.
    pub fn is_terminal(&self) -> bool {
        self.is_integrity()
            || matches!(
                self,
                FetchError::Io { .. } | FetchError::Cancelled | FetchError::Internal { .. }
            )
    }

    /// True if the failure asks for credentials rather than reporting absence.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            FetchError::Unauthorized { .. } | FetchError::UnauthorizedInRepositories { .. }
        )
    }
}

/// Result type for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;

// =============================================================================
// Batch errors
// =============================================================================

/// One failed request in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {error}")]
pub struct FetchFailure {
    pub path: String,
    #[source]
    pub error: FetchError,
}

/// Every failure of a batch that did not fully succeed.
///
/// The message names the first failure (in request order) and
/// [`source`](std::error::Error::source) returns it; [`failures`](Self::failures)
/// lists all of them. Files that were fetched successfully in the same batch
/// are kept in [`fetched`](Self::fetched).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    total: usize,
    failures: Vec<FetchFailure>,
    fetched: Vec<FetchedFile>,
}

impl BatchError {
    /// Build a batch error, or `None` if there were no failures.
    pub fn new(total: usize, failures: Vec<FetchFailure>, fetched: Vec<FetchedFile>) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        Some(Self {
            total,
            failures,
            fetched,
        })
    }

    /// Number of requests in the batch.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The first failure in request order.
    pub fn first(&self) -> &FetchFailure {
        // Non-empty by construction.
        &self.failures[0]
    }

    pub fn failures(&self) -> &[FetchFailure] {
        &self.failures
    }

    pub fn fetched(&self) -> &[FetchedFile] {
        &self.fetched
    }

    /// True if any request failed only for lack of valid credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.failures.iter().any(|failure| failure.error.is_unauthorized())
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} downloads failed; first failure: {}",
            self.failures.len(),
            self.total,
            self.first()
        )
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn retry_classification() {
        let url = "https://repo/x.jar".to_string();
        assert!(FetchError::Status { url: url.clone(), status: 500 }.is_retryable());
        assert!(FetchError::Status { url: url.clone(), status: 302 }.is_retryable());
        assert!(!FetchError::Status { url: url.clone(), status: 403 }.is_retryable());
        assert!(!FetchError::Unauthorized { url: url.clone() }.is_retryable());
        assert!(!FetchError::NotFound { url: url.clone() }.is_retryable());
        assert!(FetchError::Transport {
            url: url.clone(),
            message: "reset".to_string()
        }
        .is_retryable());

        let mismatch = FetchError::ChecksumMismatch {
            path: PathBuf::from("/cache/x.jar"),
            expected: "a".repeat(64),
            actual: "b".repeat(64),
            size: 3,
        };
        assert!(!mismatch.is_retryable());
        assert!(mismatch.is_integrity());
        assert!(mismatch.is_terminal());
    }

    #[test]
    fn batch_error_names_first_failure() {
        let failures = vec![
            FetchFailure {
                path: "a.jar".to_string(),
                error: FetchError::NotFound {
                    url: "https://repo/a.jar".to_string(),
                },
            },
            FetchFailure {
                path: "b.jar".to_string(),
                error: FetchError::Cancelled,
            },
        ];
        let error = BatchError::new(5, failures, Vec::new()).unwrap();

        let message = error.to_string();
        assert!(message.starts_with("2 of 5 downloads failed"));
        assert!(message.contains("a.jar"));
        assert_eq!(error.source().unwrap().to_string(), error.first().to_string());
        assert_eq!(error.failures().len(), 2);
    }

    #[test]
    fn batch_error_requires_failures() {
        assert!(BatchError::new(1, Vec::new(), Vec::new()).is_none());
    }
}
