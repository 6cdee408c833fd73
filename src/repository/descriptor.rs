use serde::{Deserialize, Serialize};

/// Identifier of a configured remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(String);

impl RepositoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remote repository: identity, base URL and whether it needs credentials.
///
/// Immutable once built; supplied wholesale by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    id: RepositoryId,
    base_url: String,
    private: bool,
}

impl RepositoryDescriptor {
    /// Create a descriptor. Trailing slashes are stripped from `base_url`.
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, private: bool) -> Self {
        Self {
            id: RepositoryId::new(id),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            private,
        }
    }

    pub fn id(&self) -> &RepositoryId {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    /// URL of `relative_path` in this repository.
    pub fn file_url(&self, relative_path: &str) -> String {
        format!("{}/{}", self.base_url, relative_path)
    }
}
