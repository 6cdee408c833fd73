//! Dependency identities and descriptors.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::repository::RepositoryId;

/// Version keyword that always tracks the newest published version.
pub const LATEST_VERSION: &str = "LATEST";
/// Version keyword that tracks the newest non-snapshot version.
pub const RELEASE_VERSION: &str = "RELEASE";
/// Suffix marking a mutable snapshot version.
pub const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

const DEFAULT_SCOPE: &str = "compile";

/// Identifies one declared dependency.
///
/// Used as the de-duplication key by the queues and by the single-flight
/// resolution map. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyId {
    pub group: String,
    pub artifact: String,
    pub version: String,
    pub scope: String,
}

impl DependencyId {
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
            scope: scope.into(),
        }
    }

    /// The `group:artifact:version` coordinates.
    pub fn coordinates(&self) -> String {
        format!("{}:{}:{}", self.group, self.artifact, self.version)
    }
}

impl std::fmt::Display for DependencyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.coordinates(), self.scope)
    }
}

/// Category of on-disk root a dependency declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootKind {
    Classes,
    Sources,
    Docs,
    Annotations,
}

impl RootKind {
    pub const ALL: [RootKind; 4] = [
        RootKind::Classes,
        RootKind::Sources,
        RootKind::Docs,
        RootKind::Annotations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RootKind::Classes => "classes",
            RootKind::Sources => "sources",
            RootKind::Docs => "docs",
            RootKind::Annotations => "annotations",
        }
    }
}

/// Expected sha256 for one file, keyed by its path relative to the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub path: String,
    pub sha256: String,
}

/// A declared dependency: coordinates, bound repository, roots and checksums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub group: String,
    pub artifact: String,
    pub version: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Repository this dependency must be fetched from, if bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryId>,
    /// Absolute local paths of every declared root, per kind.
    #[serde(default)]
    pub roots: BTreeMap<RootKind, Vec<PathBuf>>,
    /// Per-file verification records. `None` means verification is not configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Vec<ChecksumRecord>>,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

impl Dependency {
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
            scope: default_scope(),
            repository: None,
            roots: BTreeMap::new(),
            verification: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_repository(mut self, repository: RepositoryId) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_root(mut self, kind: RootKind, path: impl Into<PathBuf>) -> Self {
        self.roots.entry(kind).or_default().push(path.into());
        self
    }

    pub fn with_checksum(mut self, path: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.verification
            .get_or_insert_with(Vec::new)
            .push(ChecksumRecord {
                path: path.into(),
                sha256: sha256.into(),
            });
        self
    }

    pub fn id(&self) -> DependencyId {
        DependencyId::new(&self.group, &self.artifact, &self.version, &self.scope)
    }

    /// True unless the version is `LATEST`, `RELEASE` or a snapshot.
    pub fn has_fixed_version(&self) -> bool {
        is_fixed_version(&self.version)
    }

    /// Expected sha256 for `relative_path`, if a verification record exists.
    pub fn checksum_for(&self, relative_path: &str) -> Option<&str> {
        self.verification
            .as_ref()?
            .iter()
            .find(|record| record.path == relative_path)
            .map(|record| record.sha256.as_str())
    }

    /// Iterate every declared root with its kind.
    pub fn all_roots(&self) -> impl Iterator<Item = (RootKind, &PathBuf)> {
        self.roots
            .iter()
            .flat_map(|(kind, paths)| paths.iter().map(move |path| (*kind, path)))
    }
}

/// True if `version` names one immutable release.
pub fn is_fixed_version(version: &str) -> bool {
    let version = version.trim();
    !(version.is_empty()
        || version.eq_ignore_ascii_case(LATEST_VERSION)
        || version.eq_ignore_ascii_case(RELEASE_VERSION)
        || version.to_ascii_uppercase().ends_with(SNAPSHOT_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_versions() {
        assert!(is_fixed_version("1.2.3"));
        assert!(is_fixed_version("2.0.0-RC1"));
        assert!(!is_fixed_version("LATEST"));
        assert!(!is_fixed_version("release"));
        assert!(!is_fixed_version("1.0-SNAPSHOT"));
        assert!(!is_fixed_version("1.0-snapshot"));
        assert!(!is_fixed_version(""));
    }

    #[test]
    fn id_includes_scope() {
        let compile = Dependency::new("org.acme", "lib", "1.0");
        let test = Dependency::new("org.acme", "lib", "1.0").with_scope("test");
        assert_ne!(compile.id(), test.id());
        assert_eq!(compile.id().to_string(), "org.acme:lib:1.0 (compile)");
    }

    #[test]
    fn checksum_lookup() {
        let dep = Dependency::new("org.acme", "lib", "1.0")
            .with_checksum("org/acme/lib/1.0/lib-1.0.jar", "aa".repeat(32));
        assert_eq!(
            dep.checksum_for("org/acme/lib/1.0/lib-1.0.jar"),
            Some("aa".repeat(32).as_str())
        );
        assert_eq!(dep.checksum_for("other.jar"), None);
    }

    #[test]
    fn deserializes_manifest_entry() {
        let dep: Dependency = serde_json::from_str(
            r#"{
                "group": "org.acme",
                "artifact": "lib",
                "version": "1.0",
                "repository": "central",
                "roots": { "classes": ["/cache/org/acme/lib/1.0/lib-1.0.jar"] }
            }"#,
        )
        .unwrap();
        assert_eq!(dep.scope, "compile");
        assert_eq!(dep.repository, Some(RepositoryId::new("central")));
        assert_eq!(dep.roots[&RootKind::Classes].len(), 1);
        assert!(dep.verification.is_none());
    }
}
