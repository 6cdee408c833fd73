//! Flow control for the shared fetch worker pool.
//!
//! The [`CapacityManager`] bounds how many downloads run at once across the
//! whole fetch subsystem. Callers reserve capacity with
//! [`use_capacity`](CapacityManager::use_capacity) and hold the returned
//! [`UsedCapacity`] for the duration of the work; dropping it returns the
//! capacity and wakes the next waiter in FIFO order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

// =============================================================================
// UsedCapacity
// =============================================================================

/// A reservation against a [`CapacityManager`].
///
/// Capacity is returned when this handle is dropped, so it cannot leak even
/// if the task holding it is cancelled.
pub struct UsedCapacity {
    amount: u64,
    inner: Arc<Inner>,
}

impl UsedCapacity {
    /// Returns the amount of capacity this handle holds.
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Drop for UsedCapacity {
    fn drop(&mut self) {
        if self.amount > 0 {
            self.inner.release(self.amount);
        }
    }
}

impl std::fmt::Debug for UsedCapacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsedCapacity")
            .field("amount", &self.amount)
            .finish()
    }
}

// =============================================================================
// Internal State
// =============================================================================

struct Waiter {
    amount: u64,
    sender: oneshot::Sender<UsedCapacity>,
}

struct State {
    limit: u64,
    used: u64,
    waiters: VecDeque<Waiter>,
}

struct Inner {
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return capacity and hand it to queued waiters that now fit.
    fn release(self: &Arc<Self>, amount: u64) {
        let mut state = self.lock();
        state.used = state.used.saturating_sub(amount);

        while let Some(waiter) = state.waiters.front() {
            if state.used + waiter.amount > state.limit {
                break;
            }
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.used += waiter.amount;
            let handle = UsedCapacity {
                amount: waiter.amount,
                inner: Arc::clone(self),
            };
            if let Err(mut returned) = waiter.sender.send(handle) {
                // Receiver is gone. Undo the grant here; dropping a live handle
                // would re-enter release() while the lock is held.
                state.used -= returned.amount;
                returned.amount = 0;
            }
        }
    }
}

// =============================================================================
// CapacityManager
// =============================================================================

/// Bounds concurrent use of a shared resource.
///
/// Cloning a `CapacityManager` shares the same underlying limit, which is how
/// one worker pool is shared by every batch download in the process.
///
/// # Examples
///
/// ```
/// use artifact_sync::util::CapacityManager;
///
/// # async fn example() {
/// let pool = CapacityManager::new(16);
/// let permit = pool.use_capacity(1).await;
/// assert_eq!(pool.available(), 15);
/// drop(permit);
/// assert_eq!(pool.available(), 16);
/// # }
/// ```
#[derive(Clone)]
pub struct CapacityManager {
    inner: Arc<Inner>,
}

impl CapacityManager {
    /// Create a manager with the given limit. A limit of zero is raised to one.
    pub fn new(limit: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    limit: limit.max(1),
                    used: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Reserve `amount` of capacity, waiting until it is available.
    ///
    /// Requests larger than the limit are clamped to the limit so they can
    /// eventually be satisfied.
    pub async fn use_capacity(&self, amount: u64) -> UsedCapacity {
        let receiver = {
            let mut state = self.inner.lock();
            let amount = amount.min(state.limit);
            if state.waiters.is_empty() && state.used + amount <= state.limit {
                state.used += amount;
                return UsedCapacity {
                    amount,
                    inner: Arc::clone(&self.inner),
                };
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(Waiter { amount, sender });
            receiver
        };

        match receiver.await {
            Ok(used) => used,
            // The sender lives in our own queue and is only dropped after a
            // successful send, so this arm is unreachable in practice.
            Err(_) => UsedCapacity {
                amount: 0,
                inner: Arc::clone(&self.inner),
            },
        }
    }

    /// Returns the configured limit.
    pub fn limit(&self) -> u64 {
        self.inner.lock().limit
    }

    /// Returns the capacity not currently reserved.
    pub fn available(&self) -> u64 {
        let state = self.inner.lock();
        state.limit.saturating_sub(state.used)
    }
}

impl std::fmt::Debug for CapacityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CapacityManager")
            .field("limit", &state.limit)
            .field("used", &state.used)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
