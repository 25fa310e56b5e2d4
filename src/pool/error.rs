//! Worker pool error types.

use std::fmt;

/// Errors that can occur during pool operations.
#[derive(Debug, Clone)]
pub enum PoolError {
    /// The job queue is full.
    QueueFull {
        /// Maximum queue capacity.
        capacity: usize,
        /// Current number of pending jobs.
        pending: usize,
    },

    /// A job panicked on its worker thread.
    WorkerPanic(String),

    /// The pool has been shut down.
    Shutdown,

    /// The result channel was closed unexpectedly.
    ChannelClosed,
}

impl PoolError {
    pub fn is_queue_full(&self) -> bool {
        matches!(self, PoolError::QueueFull { .. })
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, PoolError::Shutdown)
    }

    /// Get the error message for logging.
    pub fn message(&self) -> &str {
        match self {
            PoolError::QueueFull { .. } => "Queue full",
            PoolError::WorkerPanic(_) => "Worker panic",
            PoolError::Shutdown => "Pool shutdown",
            PoolError::ChannelClosed => "Channel closed",
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::QueueFull { capacity, pending } => {
                write!(f, "queue full: {}/{} pending jobs", pending, capacity)
            }
            PoolError::WorkerPanic(msg) => write!(f, "worker panic: {}", msg),
            PoolError::Shutdown => write!(f, "pool has been shut down"),
            PoolError::ChannelClosed => write!(f, "result channel closed unexpectedly"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
