//! Credential lookup for private repositories.
//!
//! Credentials come from a chain of [`CredentialResolver`]s tried in order
//! until one returns a value. The engine calls the chain once per private
//! repository per batch, before any request to that repository is sent.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::HeaderValue;

use super::{RepositoryDescriptor, RepositoryId};

const ENV_PREFIX: &str = "ARTSYNC_REPO_";

/// A username/password pair for one repository.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Build the `Authorization` header value.
    ///
    /// An empty username with a non-empty password is sent as a bearer token;
    /// everything else uses basic authentication.
    pub fn authorization_header(&self) -> Option<HeaderValue> {
        let value = if self.username.is_empty() && !self.password.is_empty() {
            format!("Bearer {}", self.password)
        } else {
            let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
            format!("Basic {}", encoded)
        };
        let mut header = HeaderValue::from_str(&value).ok()?;
        header.set_sensitive(true);
        Some(header)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolves credentials for a repository.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, repository: &RepositoryDescriptor) -> Option<Credentials>;
}

// =============================================================================
// CredentialChain
// =============================================================================

/// Tries each resolver in order; the first non-`None` answer wins.
#[derive(Default)]
pub struct CredentialChain {
    resolvers: Vec<Box<dyn CredentialResolver>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: impl CredentialResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl CredentialResolver for CredentialChain {
    fn resolve(&self, repository: &RepositoryDescriptor) -> Option<Credentials> {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(repository))
    }
}

// =============================================================================
// EnvCredentialResolver
// =============================================================================

/// Reads `ARTSYNC_REPO_<ID>_USERNAME` and `ARTSYNC_REPO_<ID>_PASSWORD`.
///
/// `<ID>` is the repository id uppercased with every non-alphanumeric
/// character replaced by `_`. A password without a username is accepted and
/// becomes a bearer token.
pub struct EnvCredentialResolver {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl EnvCredentialResolver {
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Use a custom variable lookup instead of the process environment.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn variable_name(repository: &RepositoryId, suffix: &str) -> String {
        let id: String = repository
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}_{}", ENV_PREFIX, id, suffix)
    }
}

impl Default for EnvCredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, repository: &RepositoryDescriptor) -> Option<Credentials> {
        let password = (self.lookup)(&Self::variable_name(repository.id(), "PASSWORD"))?;
        let username =
            (self.lookup)(&Self::variable_name(repository.id(), "USERNAME")).unwrap_or_default();
        Some(Credentials::new(username, password))
    }
}

// =============================================================================
// StaticCredentialResolver
// =============================================================================

/// Fixed credentials per repository id, typically read from configuration.
#[derive(Default)]
pub struct StaticCredentialResolver {
    credentials: HashMap<RepositoryId, Credentials>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, repository: RepositoryId, credentials: Credentials) {
        self.credentials.insert(repository, credentials);
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, repository: &RepositoryDescriptor) -> Option<Credentials> {
        self.credentials.get(repository.id()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_repo(id: &str) -> RepositoryDescriptor {
        RepositoryDescriptor::new(id, "https://repo.example.com", true)
    }

    #[test]
    fn basic_header() {
        let header = Credentials::new("user", "pass").authorization_header().unwrap();
        assert_eq!(header.to_str().unwrap(), "Basic dXNlcjpwYXNz");
        assert!(header.is_sensitive());
    }

    #[test]
    fn bearer_header_without_username() {
        let header = Credentials::new("", "token").authorization_header().unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer token");
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("user", "secret"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn env_resolver_reads_variables() {
        let resolver = EnvCredentialResolver::with_lookup(|name| match name {
            "ARTSYNC_REPO_MY_REPO_USERNAME" => Some("alice".to_string()),
            "ARTSYNC_REPO_MY_REPO_PASSWORD" => Some("pw".to_string()),
            _ => None,
        });
        assert_eq!(
            resolver.resolve(&private_repo("my-repo")),
            Some(Credentials::new("alice", "pw"))
        );
        assert_eq!(resolver.resolve(&private_repo("other")), None);
    }

    #[test]
    fn chain_returns_first_answer() {
        let mut first = StaticCredentialResolver::new();
        first.insert(RepositoryId::new("a"), Credentials::new("from-static", "1"));
        let second = EnvCredentialResolver::with_lookup(|name| {
            name.ends_with("_PASSWORD").then(|| "2".to_string())
        });

        let chain = CredentialChain::new().with(first).with(second);
        assert_eq!(chain.len(), 2);
        assert_eq!(
            chain.resolve(&private_repo("a")).unwrap().username,
            "from-static"
        );
        assert_eq!(chain.resolve(&private_repo("b")).unwrap().password, "2");
        assert!(CredentialChain::new().resolve(&private_repo("a")).is_none());
    }
}
