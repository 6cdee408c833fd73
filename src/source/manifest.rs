//! JSON manifest of dependency declarations.
//!
//! ```json
//! {
//!   "dependencies": [
//!     {
//!       "group": "org.acme",
//!       "artifact": "lib",
//!       "version": "1.0",
//!       "repository": "central",
//!       "roots": { "classes": ["/cache/org/acme/lib/1.0/lib-1.0.jar"] },
//!       "verification": [
//!         { "path": "org/acme/lib/1.0/lib-1.0.jar", "sha256": "..." }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{DeclarationEvent, DeclarationSource};
use crate::model::{Dependency, DependencyId};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("dependency {0} is declared more than once")]
    Duplicate(DependencyId),

    #[error("manifest source has no backing file")]
    NoFile,
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// On-disk manifest layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Manifest {
    pub fn parse(path: &Path, contents: &[u8]) -> Result<Self> {
        serde_json::from_slice(contents).map_err(|source| SourceError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn into_map(self) -> Result<BTreeMap<DependencyId, Dependency>> {
        let mut map = BTreeMap::new();
        for dependency in self.dependencies {
            let id = dependency.id();
            if map.insert(id.clone(), dependency).is_some() {
                return Err(SourceError::Duplicate(id));
            }
        }
        Ok(map)
    }
}

/// A [`DeclarationSource`] backed by a JSON manifest.
#[derive(Debug)]
pub struct ManifestSource {
    path: Option<PathBuf>,
    declarations: RwLock<BTreeMap<DependencyId, Dependency>>,
}

impl ManifestSource {
    /// An in-memory source with fixed declarations.
    pub fn from_dependencies(dependencies: Vec<Dependency>) -> Result<Self> {
        Ok(Self {
            path: None,
            declarations: RwLock::new(Manifest { dependencies }.into_map()?),
        })
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let declarations = read_manifest(&path)?;
        debug!(path = %path.display(), dependencies = declarations.len(), "loaded manifest");
        Ok(Self {
            path: Some(path),
            declarations: RwLock::new(declarations),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the manifest file and report what changed.
    ///
    /// On error the previous declarations are kept.
    pub fn reload(&self) -> Result<Vec<DeclarationEvent>> {
        let path = self.path.as_ref().ok_or(SourceError::NoFile)?;
        let declarations = read_manifest(path)?;
        Ok(self.replace_map(declarations))
    }

    /// Replace every declaration and report what changed.
    pub fn replace(&self, dependencies: Vec<Dependency>) -> Result<Vec<DeclarationEvent>> {
        let declarations = Manifest { dependencies }.into_map()?;
        Ok(self.replace_map(declarations))
    }

    fn replace_map(&self, next: BTreeMap<DependencyId, Dependency>) -> Vec<DeclarationEvent> {
        let mut current = self
            .declarations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut events = Vec::new();
        for (id, dependency) in &next {
            match current.get(id) {
                None => events.push(DeclarationEvent::Added(id.clone())),
                Some(previous) if previous != dependency => {
                    events.push(DeclarationEvent::Changed(id.clone()))
                }
                Some(_) => {}
            }
        }
        for id in current.keys() {
            if !next.contains_key(id) {
                events.push(DeclarationEvent::Removed(id.clone()));
            }
        }

        *current = next;
        events
    }
}

impl DeclarationSource for ManifestSource {
    fn dependencies(&self) -> Vec<Dependency> {
        self.declarations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn dependency(&self, id: &DependencyId) -> Option<Dependency> {
        self.declarations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

fn read_manifest(path: &Path) -> Result<BTreeMap<DependencyId, Dependency>> {
    let contents = std::fs::read(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Manifest::parse(path, &contents)?.into_map()
}
