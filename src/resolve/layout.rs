//! Recognized local cache roots.

use std::path::{Path, PathBuf};

/// The directories that mirror remote repository layouts on disk.
///
/// The first root is the primary one: ad-hoc fetches land there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    roots: Vec<PathBuf>,
}

impl CacheLayout {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![primary.into()],
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
        self
    }

    pub fn primary(&self) -> &Path {
        &self.roots[0]
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Split `path` into its cache root and the path relative to it.
    ///
    /// When roots are nested the most specific one wins. Returns `None` for
    /// paths outside every root and for a root itself.
    pub fn locate<'a>(&'a self, path: &'a Path) -> Option<(&'a Path, &'a Path)> {
        self.roots
            .iter()
            .filter_map(|root| {
                path.strip_prefix(root)
                    .ok()
                    .filter(|relative| !relative.as_os_str().is_empty())
                    .map(|relative| (root.as_path(), relative))
            })
            .max_by_key(|(root, _)| root.components().count())
    }
}
