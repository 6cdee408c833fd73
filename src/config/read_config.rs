//! Configuration file reading and parsing.
//!
//! This module handles locating, reading, and parsing INI-format configuration files,
//! with support for layered overrides.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use configparser::ini::Ini;
use thiserror::Error;

use super::{
    CacheConfig, Config, HumanDuration, NetworkConfig, RepositoryConfig, VerificationConfig,
};

// =============================================================================
// Constants - Default Values
// =============================================================================

const DEFAULT_CACHE_DIR: &str = ".artsync/repository";
const FALLBACK_CACHE_PATH: &str = "/tmp/artsync/repository";
const DEFAULT_CACHE_SIDE_CACHE: bool = true;
const DEFAULT_NETWORK_MAX_CONCURRENT_DOWNLOADS: u32 = 16;
const DEFAULT_NETWORK_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_NETWORK_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_NETWORK_MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_NETWORK_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_NETWORK_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_NETWORK_FORCE_HTTPS: bool = false;
const DEFAULT_VERIFICATION_CHECKSUMS: bool = true;

const ENV_CONFIG_FILE: &str = "ARTSYNC_CONFIG_FILE";
const DEFAULT_CONFIG_FILENAME: &str = ".artsyncconfig";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid duration '{value}': {message}")]
    InvalidDuration { value: String, message: String },

    #[error("invalid integer '{value}': {source}")]
    InvalidInteger {
        value: String,
        source: std::num::ParseIntError,
    },

    #[error("invalid boolean '{value}' for key '{key}'")]
    InvalidBoolean { key: String, value: String },

    #[error("invalid override key '{key}': {message}")]
    InvalidOverrideKey { key: String, message: String },

    #[error("missing required field '{field}' in section '{section}'")]
    MissingRequiredField { section: String, field: String },

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// =============================================================================
// ConfigSource
// =============================================================================

/// Specifies how to locate and layer configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    /// Explicit config file path from CLI. If specified and doesn't exist, error.
    /// If None, fall back to ARTSYNC_CONFIG_FILE env var, then ~/.artsyncconfig.
    pub config_file: Option<PathBuf>,

    /// Additional override config file (layered on top of base config).
    pub override_file: Option<PathBuf>,

    /// Individual key=value overrides (applied last).
    /// Keys use dot-notation: "cache.path", "repository.central.url"
    pub overrides: Vec<(String, String)>,
}

// =============================================================================
// Duration Parsing
// =============================================================================

impl HumanDuration {
    /// Parse a duration from a string like "500ms", "30s", "5m", "1h", or plain "10" (seconds).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidDuration {
                value: s.to_string(),
                message: "empty string".to_string(),
            });
        }

        let num_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());

        if num_end == 0 {
            return Err(ConfigError::InvalidDuration {
                value: s.to_string(),
                message: "no numeric value".to_string(),
            });
        }

        let num_str = &s[..num_end];
        let suffix = s[num_end..].trim().to_lowercase();

        let base: u64 = num_str.parse().map_err(|e| ConfigError::InvalidDuration {
            value: s.to_string(),
            message: format!("invalid number: {}", e),
        })?;

        let duration = match suffix.as_str() {
            "ms" => Duration::from_millis(base),
            "" | "s" => Duration::from_secs(base),
            "m" => Duration::from_secs(base.saturating_mul(60)),
            "h" => Duration::from_secs(base.saturating_mul(60 * 60)),
            _ => {
                return Err(ConfigError::InvalidDuration {
                    value: s.to_string(),
                    message: format!("unknown suffix '{}'", suffix),
                });
            }
        };

        Ok(HumanDuration(duration))
    }
}

// =============================================================================
// Value Parsing
// =============================================================================

/// Parse a boolean value.
fn parse_bool(ini: &Ini, section: &str, key: &str, default: bool) -> Result<bool> {
    match ini.get(section, key) {
        None => Ok(default),
        Some(v) => parse_bool_value(key, &v),
    }
}

fn parse_bool_value(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBoolean {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_u32_value(value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidInteger {
            value: value.to_string(),
            source: e,
        })
}

/// Counts that size pools or attempt loops must be at least one.
fn parse_positive_u32(key: &str, value: &str) -> Result<u32> {
    match parse_u32_value(value)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".to_string(),
        }),
        n => Ok(n),
    }
}

fn parse_i64_value(value: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidInteger {
            value: value.to_string(),
            source: e,
        })
}

/// Parse a comma-separated string into a Vec of trimmed paths.
fn parse_path_list(s: &str) -> Vec<PathBuf> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

// =============================================================================
// Config File Resolution
// =============================================================================

/// Information about how the config file was resolved.
#[derive(Debug)]
pub struct ResolvedConfigFile {
    /// The path to the config file, if one was found.
    pub path: Option<PathBuf>,
    /// Warning message if env var pointed to nonexistent file.
    pub warning: Option<String>,
}

/// Resolve which config file to use based on the ConfigSource and environment.
fn resolve_config_file(source: &ConfigSource) -> Result<ResolvedConfigFile> {
    if let Some(ref path) = source.config_file {
        if path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(path.clone()),
                warning: None,
            });
        } else {
            return Err(ConfigError::FileNotFound(path.clone()));
        }
    }

    if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(path),
                warning: None,
            });
        } else {
            // Warn but continue with defaults
            return Ok(ResolvedConfigFile {
                path: None,
                warning: Some(format!(
                    "config file specified by {} does not exist: {}",
                    ENV_CONFIG_FILE, env_path
                )),
            });
        }
    }

    if let Some(home) = home_dir() {
        let default_path = home.join(DEFAULT_CONFIG_FILENAME);
        if default_path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(default_path),
                warning: None,
            });
        }
    }

    Ok(ResolvedConfigFile {
        path: None,
        warning: None,
    })
}

/// Get the user's home directory.
fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

// =============================================================================
// Default Config
// =============================================================================

fn default_cache_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(DEFAULT_CACHE_DIR),
        None => PathBuf::from(FALLBACK_CACHE_PATH),
    }
}

/// Create a Config with all default values.
fn default_config() -> Config {
    Config {
        cache: CacheConfig {
            path: default_cache_path(),
            extra_roots: Vec::new(),
            side_cache: DEFAULT_CACHE_SIDE_CACHE,
            side_cache_file: None,
        },
        network: NetworkConfig {
            max_concurrent_downloads: DEFAULT_NETWORK_MAX_CONCURRENT_DOWNLOADS,
            max_attempts: DEFAULT_NETWORK_MAX_ATTEMPTS,
            initial_backoff: HumanDuration(DEFAULT_NETWORK_INITIAL_BACKOFF),
            max_backoff: HumanDuration(DEFAULT_NETWORK_MAX_BACKOFF),
            connect_timeout: HumanDuration(DEFAULT_NETWORK_CONNECT_TIMEOUT),
            resolution_timeout: HumanDuration(DEFAULT_NETWORK_RESOLUTION_TIMEOUT),
            force_https: DEFAULT_NETWORK_FORCE_HTTPS,
        },
        verification: VerificationConfig {
            checksums: DEFAULT_VERIFICATION_CHECKSUMS,
        },
        repositories: HashMap::new(),
    }
}

// =============================================================================
// INI Parsing
// =============================================================================

/// Apply an INI file's contents to a Config, layering on top of existing values.
///
/// Every key goes through the same setter used for `--config key=value`, so a
/// file and an override accept exactly the same vocabulary.
fn apply_ini_to_config(config: &mut Config, ini: &Ini) -> Result<()> {
    for section in ["cache", "network", "verification"] {
        for (key, value) in section_entries(ini, section) {
            apply_override(config, &format!("{}.{}", section, key), &value)?;
        }
    }

    let sections: Vec<String> = ini.sections();
    for section_name in sections {
        if let Some(repo_name) = section_name.strip_prefix("repository.") {
            let url =
                ini.get(&section_name, "url")
                    .ok_or_else(|| ConfigError::MissingRequiredField {
                        section: section_name.clone(),
                        field: "url".to_string(),
                    })?;

            let repo_config = RepositoryConfig {
                url,
                private: parse_bool(ini, &section_name, "private", false)?,
                order: match ini.get(&section_name, "order") {
                    Some(v) => parse_i64_value(&v)?,
                    None => 0,
                },
                username: ini.get(&section_name, "username"),
                password: ini.get(&section_name, "password"),
            };

            config
                .repositories
                .insert(repo_name.to_string(), repo_config);
        }
    }

    Ok(())
}

/// Keys with values in an INI section, in no particular order.
fn section_entries(ini: &Ini, section: &str) -> Vec<(String, String)> {
    let map = ini.get_map_ref();
    match map.get(section) {
        Some(entries) => entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect(),
        None => Vec::new(),
    }
}

/// Load and parse an INI file.
fn load_ini(path: &Path) -> Result<Ini> {
    let mut ini = Ini::new();
    ini.load(path).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e,
    })?;
    Ok(ini)
}

// =============================================================================
// Override Application
// =============================================================================

/// Apply a single key=value override to the config.
fn apply_override(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let parts: Vec<&str> = key.splitn(3, '.').collect();

    match parts.as_slice() {
        // cache.path, cache.extra_roots, ...
        ["cache", param] => apply_cache_override(config, param, value),

        // network.max_concurrent_downloads, network.max_attempts, ...
        ["network", param] => apply_network_override(config, param, value),

        // verification.checksums
        ["verification", param] => apply_verification_override(config, param, value),

        // repository.name.param
        ["repository", name, param] => apply_repository_override(config, name, param, value),

        _ => Err(ConfigError::InvalidOverrideKey {
            key: key.to_string(),
            message: "unrecognized key format".to_string(),
        }),
    }
}

fn apply_cache_override(config: &mut Config, param: &str, value: &str) -> Result<()> {
    match param {
        "path" => config.cache.path = PathBuf::from(value),
        "extra_roots" => config.cache.extra_roots = parse_path_list(value),
        "side_cache" => config.cache.side_cache = parse_bool_value(param, value)?,
        "side_cache_file" => config.cache.side_cache_file = Some(PathBuf::from(value)),
        _ => {
            return Err(ConfigError::InvalidOverrideKey {
                key: format!("cache.{}", param),
                message: "unknown parameter".to_string(),
            })
        }
    }
    Ok(())
}

fn apply_network_override(config: &mut Config, param: &str, value: &str) -> Result<()> {
    let network = &mut config.network;
    match param {
        "max_concurrent_downloads" => {
            network.max_concurrent_downloads = parse_positive_u32("network.max_concurrent_downloads", value)?
        }
        "max_attempts" => {
            network.max_attempts = parse_positive_u32("network.max_attempts", value)?
        }
        "initial_backoff" => network.initial_backoff = HumanDuration::parse(value)?,
        "max_backoff" => network.max_backoff = HumanDuration::parse(value)?,
        "connect_timeout" => network.connect_timeout = HumanDuration::parse(value)?,
        "resolution_timeout" => network.resolution_timeout = HumanDuration::parse(value)?,
        "force_https" => network.force_https = parse_bool_value(param, value)?,
        _ => {
            return Err(ConfigError::InvalidOverrideKey {
                key: format!("network.{}", param),
                message: "unknown parameter".to_string(),
            })
        }
    }
    Ok(())
}

fn apply_verification_override(config: &mut Config, param: &str, value: &str) -> Result<()> {
    match param {
        "checksums" => {
            config.verification.checksums = parse_bool_value(param, value)?;
            Ok(())
        }
        _ => Err(ConfigError::InvalidOverrideKey {
            key: format!("verification.{}", param),
            message: "unknown parameter".to_string(),
        }),
    }
}

fn apply_repository_override(
    config: &mut Config,
    name: &str,
    param: &str,
    value: &str,
) -> Result<()> {
    let repo = config.repositories.entry(name.to_string()).or_default();

    match param {
        "url" => repo.url = value.to_string(),
        "private" => repo.private = parse_bool_value(param, value)?,
        "order" => repo.order = parse_i64_value(value)?,
        "username" => repo.username = Some(value.to_string()),
        "password" => repo.password = Some(value.to_string()),
        _ => {
            return Err(ConfigError::InvalidOverrideKey {
                key: format!("repository.{}.{}", name, param),
                message: "unknown parameter".to_string(),
            })
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

/// Result of reading configuration, including any warnings.
#[derive(Debug)]
pub struct ConfigResult {
    /// The parsed configuration.
    pub config: Config,
    /// Any warnings generated during config loading.
    pub warnings: Vec<String>,
}

/// Read and parse configuration from the specified sources.
///
/// Configuration is layered in this order:
/// 1. Built-in defaults
/// 2. Base config file (from CLI, env var, or ~/.artsyncconfig)
/// 3. Override config file (if specified)
/// 4. Individual overrides (applied last)
pub fn read_config(source: &ConfigSource) -> Result<ConfigResult> {
    let mut warnings = Vec::new();

    let mut config = default_config();

    let resolved = resolve_config_file(source)?;
    if let Some(warning) = resolved.warning {
        warnings.push(warning);
    }
    if let Some(ref path) = resolved.path {
        let ini = load_ini(path)?;
        apply_ini_to_config(&mut config, &ini)?;
    }

    if let Some(ref override_path) = source.override_file {
        if !override_path.exists() {
            return Err(ConfigError::FileNotFound(override_path.clone()));
        }
        let ini = load_ini(override_path)?;
        apply_ini_to_config(&mut config, &ini)?;
    }

    for (key, value) in &source.overrides {
        apply_override(&mut config, key, value)?;
    }

    Ok(ConfigResult { config, warnings })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(text: &str) -> Ini {
        let mut ini = Ini::new();
        ini.read(text.to_string()).unwrap();
        ini
    }

    #[test]
    fn test_duration_parse() {
        assert_eq!(HumanDuration::parse("500ms").unwrap().0, Duration::from_millis(500));
        assert_eq!(HumanDuration::parse("30s").unwrap().0, Duration::from_secs(30));
        assert_eq!(HumanDuration::parse("30").unwrap().0, Duration::from_secs(30));
        assert_eq!(HumanDuration::parse("5m").unwrap().0, Duration::from_secs(300));
        assert_eq!(HumanDuration::parse(" 2h ").unwrap().0, Duration::from_secs(7200));
        assert_eq!(HumanDuration::parse("10MS").unwrap().0, Duration::from_millis(10));
    }

    #[test]
    fn test_duration_parse_errors() {
        assert!(HumanDuration::parse("").is_err());
        assert!(HumanDuration::parse("ms").is_err());
        assert!(HumanDuration::parse("10d").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert!(config.cache.path.ends_with("repository"));
        assert!(config.cache.side_cache);
        assert!(config.cache.side_cache_file.is_none());
        assert_eq!(config.network.max_concurrent_downloads, 16);
        assert_eq!(config.network.max_attempts, 4);
        assert_eq!(config.network.initial_backoff.0, Duration::from_millis(500));
        assert_eq!(config.network.resolution_timeout.0, Duration::from_secs(1800));
        assert!(!config.network.force_https);
        assert!(config.verification.checksums);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_apply_override_cache() {
        let mut config = default_config();
        apply_override(&mut config, "cache.path", "/custom/path").unwrap();
        assert_eq!(config.cache.path, PathBuf::from("/custom/path"));

        apply_override(&mut config, "cache.extra_roots", "/a, /b,").unwrap();
        assert_eq!(
            config.cache.extra_roots,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );

        apply_override(&mut config, "cache.side_cache", "no").unwrap();
        assert!(!config.cache.side_cache);
    }

    #[test]
    fn test_apply_override_network() {
        let mut config = default_config();
        apply_override(&mut config, "network.max_concurrent_downloads", "4").unwrap();
        apply_override(&mut config, "network.max_backoff", "2m").unwrap();
        apply_override(&mut config, "network.force_https", "true").unwrap();

        assert_eq!(config.network.max_concurrent_downloads, 4);
        assert_eq!(config.network.max_backoff.0, Duration::from_secs(120));
        assert!(config.network.force_https);
    }

    #[test]
    fn test_apply_override_rejects_zero_pool() {
        let mut config = default_config();
        let err = apply_override(&mut config, "network.max_concurrent_downloads", "0")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_apply_override_repository() {
        let mut config = default_config();
        apply_override(&mut config, "repository.internal.url", "https://repo.example.com/maven").unwrap();
        apply_override(&mut config, "repository.internal.private", "yes").unwrap();
        apply_override(&mut config, "repository.internal.order", "-1").unwrap();
        apply_override(&mut config, "repository.internal.username", "ci").unwrap();

        let repo = config.repositories.get("internal").unwrap();
        assert_eq!(repo.url, "https://repo.example.com/maven");
        assert!(repo.private);
        assert_eq!(repo.order, -1);
        assert_eq!(repo.username.as_deref(), Some("ci"));
        assert!(repo.password.is_none());
    }

    #[test]
    fn test_apply_override_unknown_key() {
        let mut config = default_config();
        assert!(matches!(
            apply_override(&mut config, "cache.nope", "1"),
            Err(ConfigError::InvalidOverrideKey { .. })
        ));
        assert!(matches!(
            apply_override(&mut config, "memory.max", "1"),
            Err(ConfigError::InvalidOverrideKey { .. })
        ));
    }

    #[test]
    fn test_parse_ini_config() {
        let ini = parse(
            r#"
[cache]
path = /custom/cache
extra_roots = /opt/shared-repo
side_cache_file = /custom/resolved.json

[network]
max_concurrent_downloads = 8
max_attempts = 2
initial_backoff = 100ms

[verification]
checksums = false

[repository.central]
url = https://repo1.maven.org/maven2

[repository.internal]
url = https://repo.example.com/maven
private = true
order = 5
username = ci
password = secret
"#,
        );

        let mut config = default_config();
        apply_ini_to_config(&mut config, &ini).unwrap();

        assert_eq!(config.cache.path, PathBuf::from("/custom/cache"));
        assert_eq!(config.cache.extra_roots, vec![PathBuf::from("/opt/shared-repo")]);
        assert_eq!(
            config.cache.side_cache_file,
            Some(PathBuf::from("/custom/resolved.json"))
        );
        assert_eq!(config.network.max_concurrent_downloads, 8);
        assert_eq!(config.network.max_attempts, 2);
        assert_eq!(config.network.initial_backoff.0, Duration::from_millis(100));
        assert!(!config.verification.checksums);

        let central = config.repositories.get("central").unwrap();
        assert!(!central.private);
        assert_eq!(central.order, 0);

        let internal = config.repositories.get("internal").unwrap();
        assert!(internal.private);
        assert_eq!(internal.order, 5);
        assert_eq!(internal.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_repository_without_url_is_rejected() {
        let ini = parse("[repository.broken]\nprivate = true\n");
        let mut config = default_config();
        let err = apply_ini_to_config(&mut config, &ini).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredField { .. }));
    }

    #[test]
    fn test_read_config_layers() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base.ini");
        let over = dir.path().join("override.ini");
        std::fs::write(&base, "[network]\nmax_attempts = 7\nmax_concurrent_downloads = 3\n").unwrap();
        std::fs::write(&over, "[network]\nmax_attempts = 9\n").unwrap();

        let source = ConfigSource {
            config_file: Some(base),
            override_file: Some(over),
            overrides: vec![("network.max_concurrent_downloads".to_string(), "5".to_string())],
        };
        let result = read_config(&source).unwrap();

        assert_eq!(result.config.network.max_attempts, 9);
        assert_eq!(result.config.network.max_concurrent_downloads, 5);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_read_config_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let source = ConfigSource {
            config_file: Some(dir.path().join("absent.ini")),
            ..Default::default()
        };
        assert!(matches!(
            read_config(&source),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
