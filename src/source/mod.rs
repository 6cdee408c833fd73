//! Where dependency declarations come from.

mod manifest;

pub use manifest::{Manifest, ManifestSource, SourceError};

use crate::model::{Dependency, DependencyId};

/// Enumerates the current dependency declarations.
///
/// Implementations return snapshots; a later call may reflect changes.
pub trait DeclarationSource: Send + Sync {
    fn dependencies(&self) -> Vec<Dependency>;

    /// The current declaration for `id`, or `None` if it no longer exists.
    fn dependency(&self, id: &DependencyId) -> Option<Dependency>;
}

/// A change between two snapshots of a declaration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationEvent {
    Added(DependencyId),
    Changed(DependencyId),
    Removed(DependencyId),
}

impl DeclarationEvent {
    pub fn id(&self) -> &DependencyId {
        match self {
            DeclarationEvent::Added(id)
            | DeclarationEvent::Changed(id)
            | DeclarationEvent::Removed(id) => id,
        }
    }
}
