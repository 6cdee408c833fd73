//! Queues that keep the local cache consistent with the declared dependencies.
//!
//! # Overview
//!
//! A [`SyncQueue`] collects dependency identities marked dirty by change
//! notifications and resolves them when flushed. A [`TrackingQueue`] serves
//! callers that must block until the whole declared set is consistent,
//! coalescing concurrent requests into one convergence pass.
//!
//! Both resolve dependencies one at a time through a
//! [`Resolver`](crate::resolve::Resolver); parallelism happens inside each
//! resolution. A failure or panic in one resolution is reported and the loop
//! moves on. Only cancellation of the queue's scope stops it.

mod error;
mod pass;
mod queue;
mod tracking;

#[cfg(test)]
mod test_support;

pub use error::{QueueError, Result};
pub use pass::{DependencyResult, PassReport};
pub use queue::{QueueState, SyncQueue};
pub use tracking::TrackingQueue;
