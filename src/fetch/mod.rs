//! Fetching artifact files over HTTP.
//!
//! [`ContentFetcher`] downloads one URL into one local file with atomic
//! replacement, streaming checksum verification and bounded retries.
//! [`BatchDownloader`] fans a list of relative paths out over a shared
//! download pool and falls back across repositories.

mod batch;
mod content_fetcher;
mod error;
mod policy;

pub use batch::BatchDownloader;
pub use content_fetcher::{hash_file, ContentFetcher, FetchRequest, FetchedFile};
pub use error::{BatchError, FetchError, FetchFailure, Result};
pub use policy::RetryPolicy;
