//! Dependency data model.
//!
//! A [`Dependency`] is a flat, already-resolved artifact declaration: its
//! coordinates, an optional bound repository, the absolute local paths of its
//! roots and optional per-file sha256 records. [`RelativePathRequest`] names
//! one file to fetch relative to a cache root.

mod dependency;
mod relative_path;

pub use dependency::{
    ChecksumRecord, Dependency, DependencyId, RootKind, is_fixed_version, LATEST_VERSION,
    RELEASE_VERSION, SNAPSHOT_SUFFIX,
};
pub use relative_path::{normalize_sha256, InvalidRelativePath, RelativePathRequest};
