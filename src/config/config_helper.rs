//! Configuration helper for interpreting config values.
//!
//! The `ConfigHelper` wraps a `Config` and turns raw values into the settings
//! the engine is built from: cache layout, retry policy, ordered repositories
//! and credentials.

use std::path::PathBuf;

use super::read_config::{ConfigError, Result};
use super::Config;
use crate::fetch::RetryPolicy;
use crate::repository::{Credentials, RepositoryDescriptor, StaticCredentialResolver};
use crate::resolve::{CacheLayout, OrchestratorSettings};

/// Repository used when the configuration names none.
pub const DEFAULT_REPOSITORY_ID: &str = "central";
pub const DEFAULT_REPOSITORY_URL: &str = "https://repo1.maven.org/maven2";

const SIDE_CACHE_FILENAME: &str = ".artsync-resolved.json";

/// Helper for interpreting configuration values.
#[derive(Debug, Clone)]
pub struct ConfigHelper {
    config: Config,
}

impl ConfigHelper {
    /// Create a new ConfigHelper wrapping the given config.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Get a reference to the underlying config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the helper and return the underlying config.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Primary cache root plus every extra root.
    pub fn cache_layout(&self) -> CacheLayout {
        self.config
            .cache
            .extra_roots
            .iter()
            .fold(CacheLayout::new(&self.config.cache.path), |layout, root| {
                layout.with_root(root)
            })
    }

    /// Where the checksum side cache lives, or `None` when it is disabled.
    pub fn side_cache_path(&self) -> Option<PathBuf> {
        if !self.config.cache.side_cache {
            return None;
        }
        Some(
            self.config
                .cache
                .side_cache_file
                .clone()
                .unwrap_or_else(|| self.config.cache.path.join(SIDE_CACHE_FILENAME)),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let network = &self.config.network;
        RetryPolicy::new(
            network.max_attempts,
            network.initial_backoff.0,
            network.max_backoff.0,
        )
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            verify_checksums: self.config.verification.checksums,
            timeout: self.config.network.resolution_timeout.0,
        }
    }

    pub fn max_concurrent_downloads(&self) -> u64 {
        u64::from(self.config.network.max_concurrent_downloads.max(1))
    }

    pub fn force_https(&self) -> bool {
        self.config.network.force_https
    }

    /// Configured repositories in fallback order: ascending `order`, then name.
    ///
    /// With nothing configured, a single public `central` repository is used.
    pub fn repositories(&self) -> Result<Vec<RepositoryDescriptor>> {
        if self.config.repositories.is_empty() {
            return Ok(vec![RepositoryDescriptor::new(
                DEFAULT_REPOSITORY_ID,
                DEFAULT_REPOSITORY_URL,
                false,
            )]);
        }

        let mut entries: Vec<_> = self.config.repositories.iter().collect();
        entries.sort_by(|(a_name, a), (b_name, b)| {
            a.order.cmp(&b.order).then_with(|| a_name.cmp(b_name))
        });

        entries
            .into_iter()
            .map(|(name, repo)| {
                // Overrides can create a repository without ever setting its url.
                if repo.url.is_empty() {
                    return Err(ConfigError::MissingRequiredField {
                        section: format!("repository.{}", name),
                        field: "url".to_string(),
                    });
                }
                Ok(RepositoryDescriptor::new(name.as_str(), repo.url.as_str(), repo.private))
            })
            .collect()
    }

    /// Credentials written directly into repository sections.
    ///
    /// A section needs at least a password; a username alone is ignored.
    pub fn static_credentials(&self) -> StaticCredentialResolver {
        let mut resolver = StaticCredentialResolver::new();
        for (name, repo) in &self.config.repositories {
            if let Some(password) = &repo.password {
                let username = repo.username.clone().unwrap_or_default();
                resolver.insert(
                    RepositoryDescriptor::new(name.as_str(), repo.url.as_str(), repo.private)
                        .id()
                        .clone(),
                    Credentials::new(username, password.clone()),
                );
            }
        }
        resolver
    }
}

impl From<Config> for ConfigHelper {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}
