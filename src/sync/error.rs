//! Error types for the sync queues.

/// Errors returned to producers and waiters of a queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue's worker has stopped and accepts no further requests.
    #[error("queue is closed")]
    Closed,

    /// The queue's scope was cancelled before the awaited work finished.
    #[error("queue was cancelled")]
    Cancelled,
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
