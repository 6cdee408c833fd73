//! Validated relative paths inside a local artifact cache.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors raised when constructing a [`RelativePathRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRelativePath {
    #[error("path is empty")]
    Empty,

    #[error("path '{0}' is absolute")]
    Absolute(String),

    #[error("path '{0}' is not normalized")]
    NotNormalized(String),

    #[error("invalid sha256 '{checksum}' for '{path}'")]
    InvalidChecksum { path: String, checksum: String },
}

/// A file to fetch, named by its path relative to a cache root.
///
/// The path uses `/` separators, is never absolute and contains no `.`,
/// `..` or empty segments. Construction fails immediately on any violation,
/// so an invalid request can never reach the network layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativePathRequest {
    path: String,
    sha256: Option<String>,
}

impl RelativePathRequest {
    /// Create a request for `path`, optionally pinned to a sha256 (hex).
    pub fn new(
        path: impl Into<String>,
        sha256: Option<String>,
    ) -> Result<Self, InvalidRelativePath> {
        let path = path.into();
        validate_relative(&path)?;

        let sha256 = match sha256 {
            Some(checksum) => Some(normalize_sha256(&checksum).ok_or_else(|| {
                InvalidRelativePath::InvalidChecksum {
                    path: path.clone(),
                    checksum,
                }
            })?),
            None => None,
        };

        Ok(Self { path, sha256 })
    }

    /// Create a request from a filesystem path relative to a cache root.
    pub fn from_path(path: &Path, sha256: Option<String>) -> Result<Self, InvalidRelativePath> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(InvalidRelativePath::Absolute(
                        path.to_string_lossy().into_owned(),
                    ));
                }
                Component::CurDir | Component::ParentDir => {
                    return Err(InvalidRelativePath::NotNormalized(
                        path.to_string_lossy().into_owned(),
                    ));
                }
            }
        }
        Self::new(segments.join("/"), sha256)
    }

    /// The `/`-separated relative path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The expected sha256 in lowercase hex, if any.
    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }

    /// Resolve this request against a cache root.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        let mut full = root.to_path_buf();
        for segment in self.path.split('/') {
            full.push(segment);
        }
        full
    }
}

impl std::fmt::Display for RelativePathRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

fn validate_relative(path: &str) -> Result<(), InvalidRelativePath> {
    if path.is_empty() {
        return Err(InvalidRelativePath::Empty);
    }
    if path.starts_with('/') || path.starts_with('\\') || Path::new(path).is_absolute() {
        return Err(InvalidRelativePath::Absolute(path.to_string()));
    }
    let normalized = !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !normalized {
        return Err(InvalidRelativePath::NotNormalized(path.to_string()));
    }
    Ok(())
}

/// Lowercase a sha256 hex digest, or `None` if it is not 64 hex characters.
pub fn normalize_sha256(checksum: &str) -> Option<String> {
    let checksum = checksum.trim();
    if checksum.len() == 64 && checksum.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(checksum.to_ascii_lowercase())
    } else {
        None
    }
}
