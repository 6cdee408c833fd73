//! Deciding whether a dependency's on-disk state can be trusted.

use std::path::PathBuf;

use crate::model::{Dependency, RootKind};

/// Why a dependency is, or is not, stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// `LATEST`, `RELEASE` or a snapshot: always re-resolved.
    UnfixedVersion,
    /// At least one root kind has fewer files on disk than declared.
    MissingRoots {
        kind: RootKind,
        declared: usize,
        present: usize,
        missing: Vec<PathBuf>,
    },
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

impl std::fmt::Display for Staleness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Staleness::Fresh => f.write_str("up to date"),
            Staleness::UnfixedVersion => f.write_str("unfixed version"),
            Staleness::MissingRoots {
                kind,
                declared,
                present,
                ..
            } => write!(
                f,
                "{} of {} {} roots present",
                present,
                declared,
                kind.as_str()
            ),
        }
    }
}

/// Compute staleness for one dependency.
///
/// Root kinds are checked in [`RootKind`] order; the first kind whose on-disk
/// file count differs from its declared count is reported.
pub fn staleness(dependency: &Dependency) -> Staleness {
    if !dependency.has_fixed_version() {
        return Staleness::UnfixedVersion;
    }
    for (kind, declared) in &dependency.roots {
        let missing: Vec<PathBuf> = declared
            .iter()
            .filter(|path| !path.is_file())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Staleness::MissingRoots {
                kind: *kind,
                declared: declared.len(),
                present: declared.len() - missing.len(),
                missing,
            };
        }
    }
    Staleness::Fresh
}

pub fn is_stale(dependency: &Dependency) -> bool {
    staleness(dependency).is_stale()
}
