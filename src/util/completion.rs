//! One-shot completion signals shared between a producer and many waiters.
//!
//! A [`Completion`] is resolved exactly once with a value; every current and
//! future call to [`Completion::wait`] observes a clone of that value. It is
//! the building block for both the single-flight [`Dedup`](super::Dedup) map
//! and the convergence passes of the tracking queue.

use tokio::sync::{Notify, OnceCell};

/// A value that becomes available once and is broadcast to all waiters.
pub struct Completion<T> {
    value: OnceCell<T>,
    notify: Notify,
}

impl<T: Clone> Completion<T> {
    /// Create a new unresolved completion.
    pub fn new() -> Self {
        Self {
            value: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    /// Resolve the completion and wake every waiter.
    ///
    /// Returns `false` if the completion was already resolved, in which case
    /// `value` is discarded and waiters keep the first value.
    pub fn complete(&self, value: T) -> bool {
        let accepted = self.value.set(value).is_ok();
        self.notify.notify_waiters();
        accepted
    }

    /// Returns the value if the completion has been resolved.
    pub fn get(&self) -> Option<T> {
        self.value.get().cloned()
    }

    /// Returns true once the completion has been resolved.
    pub fn is_complete(&self) -> bool {
        self.value.initialized()
    }

    /// Wait for the completion to be resolved and return its value.
    pub async fn wait(&self) -> T {
        loop {
            // Register before checking so a concurrent complete() is not missed.
            let notified = self.notify.notified();
            if let Some(value) = self.value.get() {
                return value.clone();
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}
