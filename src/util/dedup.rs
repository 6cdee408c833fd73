//! Single-flight deduplication for concurrent async operations.
//!
//! The [`Dedup`] utility combines concurrent requests with the same key into a
//! single operation. The first caller for a key (the "leader") runs the
//! operation; every caller that arrives while it runs (a "follower") waits
//! for the leader's result instead of starting a duplicate.
//!
//! # Cancellation
//!
//! If the leader's future is dropped before it produces a result, the key is
//! released and every follower receives `E::from(LeaderAbandoned)`. Followers
//! never wait on a leader that no longer exists.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use super::Completion;

/// Reported to followers when the leader was dropped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderAbandoned;

impl std::fmt::Display for LeaderAbandoned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "in-flight operation was abandoned")
    }
}

impl std::error::Error for LeaderAbandoned {}

type Slot<V, E> = Arc<Completion<Result<V, E>>>;

/// Single-flight map from key to in-progress operation.
///
/// # Example
///
/// ```ignore
/// use artifact_sync::util::Dedup;
///
/// let dedup: Dedup<String, u64, MyError> = Dedup::new();
/// let size = dedup.call("org/acme/lib.jar".to_string(), || async {
///     download().await
/// }).await;
/// ```
pub struct Dedup<K, V, E> {
    in_flight: Mutex<HashMap<K, Slot<V, E>>>,
}

impl<K, V, E> Dedup<K, V, E>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
    E: Clone + Send + From<LeaderAbandoned>,
{
    /// Create an empty `Dedup`.
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` for `key`, or join the run already in flight for `key`.
    ///
    /// All callers that overlap with one run observe a clone of the same
    /// result. A call made after a run finished starts a new run.
    pub async fn call<F, Fut>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let (slot, is_leader) = {
            let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get(&key) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Completion::new());
                    map.insert(key.clone(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !is_leader {
            return slot.wait().await;
        }

        let mut guard = LeaderGuard {
            dedup: self,
            key: Some(key),
            slot,
        };
        let result = f().await;
        guard.finish(result.clone());
        result
    }

    /// Returns true if an operation for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Returns the number of operations currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, key: &K) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

impl<K, V, E> Default for Dedup<K, V, E>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
    E: Clone + Send + From<LeaderAbandoned>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes the leader's result, or an abandonment error if dropped early.
struct LeaderGuard<'a, K, V, E>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
    E: Clone + Send + From<LeaderAbandoned>,
{
    dedup: &'a Dedup<K, V, E>,
    key: Option<K>,
    slot: Slot<V, E>,
}

impl<K, V, E> LeaderGuard<'_, K, V, E>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
    E: Clone + Send + From<LeaderAbandoned>,
{
    fn finish(&mut self, result: Result<V, E>) {
        if let Some(key) = self.key.take() {
            // Release first: callers arriving after this point start a fresh run.
            self.dedup.release(&key);
            self.slot.complete(result);
        }
    }
}

impl<K, V, E> Drop for LeaderGuard<'_, K, V, E>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
    E: Clone + Send + From<LeaderAbandoned>,
{
    fn drop(&mut self) {
        self.finish(Err(E::from(LeaderAbandoned)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Failed(String),
        Abandoned,
    }

    impl From<LeaderAbandoned> for TestError {
        fn from(_: LeaderAbandoned) -> Self {
            TestError::Abandoned
        }
    }

    #[tokio::test]
    async fn test_single_call() {
        let dedup: Dedup<String, i32, TestError> = Dedup::new();

        let result = dedup.call("key".to_string(), || async { Ok(42) }).await;

        assert_eq!(result, Ok(42));
        assert_eq!(dedup.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_runs_once() {
        let dedup: Arc<Dedup<String, i32, TestError>> = Arc::new(Dedup::new());
        let call_count = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..5 {
            let dedup = Arc::clone(&dedup);
            let call_count = Arc::clone(&call_count);

            handles.push(tokio::spawn(async move {
                dedup
                    .call("same-key".to_string(), || {
                        let call_count = Arc::clone(&call_count);
                        async move {
                            call_count.fetch_add(1, Ordering::SeqCst);
                            sleep(Duration::from_millis(50)).await;
                            Ok(42)
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let dedup: Arc<Dedup<String, i32, TestError>> = Arc::new(Dedup::new());
        let call_count = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for i in 0..5 {
            let dedup = Arc::clone(&dedup);
            let call_count = Arc::clone(&call_count);
            let key = format!("key-{}", i);

            handles.push(tokio::spawn(async move {
                dedup
                    .call(key, || {
                        let call_count = Arc::clone(&call_count);
                        async move {
                            call_count.fetch_add(1, Ordering::SeqCst);
                            sleep(Duration::from_millis(20)).await;
                            Ok(1)
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(1));
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_sequential_same_key_runs_again() {
        let dedup: Dedup<String, i32, TestError> = Dedup::new();

        let first = dedup.call("key".to_string(), || async { Ok(1) }).await;
        let second = dedup.call("key".to_string(), || async { Ok(2) }).await;

        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(2));
    }

    #[tokio::test]
    async fn test_error_shared_by_all_callers() {
        let dedup: Arc<Dedup<String, i32, TestError>> = Arc::new(Dedup::new());

        let mut handles = vec![];
        for _ in 0..3 {
            let dedup = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                dedup
                    .call("key".to_string(), || async {
                        sleep(Duration::from_millis(50)).await;
                        Err(TestError::Failed("boom".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                Err(TestError::Failed("boom".to_string()))
            );
        }
    }

    #[tokio::test]
    async fn test_abandoned_leader_releases_followers() {
        let dedup: Arc<Dedup<String, i32, TestError>> = Arc::new(Dedup::new());

        let leader_dedup = Arc::clone(&dedup);
        let leader = tokio::spawn(async move {
            leader_dedup
                .call("key".to_string(), || async {
                    sleep(Duration::from_secs(60)).await;
                    Ok(1)
                })
                .await
        });

        sleep(Duration::from_millis(10)).await;
        assert!(dedup.is_in_flight(&"key".to_string()));

        let follower_dedup = Arc::clone(&dedup);
        let follower = tokio::spawn(async move {
            follower_dedup
                .call("key".to_string(), || async { Ok(2) })
                .await
        });

        sleep(Duration::from_millis(10)).await;
        leader.abort();

        assert_eq!(follower.await.unwrap(), Err(TestError::Abandoned));
        assert_eq!(dedup.in_flight_count(), 0);
    }
}
