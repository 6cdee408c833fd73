//! Configuration types for artifact-sync.
//!
//! This module defines the structures used to represent application configuration
//! as parsed from an INI-format config file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Primitive Types
// =============================================================================

/// A duration that can be parsed from strings like "500ms", "30s", "5m", "1h".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

// =============================================================================
// Config Sections
// =============================================================================

/// [cache] section - local artifact cache layout.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Primary cache root; ad-hoc fetches land here.
    pub path: PathBuf,
    /// Further directories recognized as cache roots.
    pub extra_roots: Vec<PathBuf>,
    pub side_cache: bool,
    /// Defaults to a file inside the primary cache root.
    pub side_cache_file: Option<PathBuf>,
}

/// [network] section - download pool, retries and timeouts.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub max_concurrent_downloads: u32,
    pub max_attempts: u32,
    pub initial_backoff: HumanDuration,
    pub max_backoff: HumanDuration,
    pub connect_timeout: HumanDuration,
    pub resolution_timeout: HumanDuration,
    pub force_https: bool,
}

/// [verification] section.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub checksums: bool,
}

/// [repository.{name}] section - a remote artifact repository.
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfig {
    pub url: String,
    pub private: bool,
    /// Position in the fallback order; ties are broken by name.
    pub order: i64,
    pub username: Option<String>,
    pub password: Option<String>,
}

// =============================================================================
// Top-Level Config
// =============================================================================

/// Complete application configuration as parsed from config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub verification: VerificationConfig,
    pub repositories: HashMap<String, RepositoryConfig>,
}
