//! Resolution of single dependencies.
//!
//! The [`ResolutionOrchestrator`] decides which of a dependency's declared
//! roots need fetching, hands them to the batch downloader grouped by cache
//! root, and publishes the results. Concurrent requests for the same
//! dependency join one in-flight resolution.

mod error;
mod layout;
mod orchestrator;
mod side_cache;
mod staleness;

pub use error::{ResolveError, Result};
pub use layout::CacheLayout;
pub use orchestrator::{
    OrchestratorSettings, ResolutionOrchestrator, ResolutionPlan, ResolveOutcome, Resolver,
};
pub use side_cache::{SideCache, SideCacheError, SideCacheRecord};
pub use staleness::{is_stale, staleness, Staleness};
