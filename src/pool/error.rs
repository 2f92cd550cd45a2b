//! Worker pool error types.

use std::fmt;
use std::time::Duration;

/// Errors an assignment can settle with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pending queue is at capacity; the input was never queued.
    QueueFull {
        /// Maximum number of pending assignments.
        capacity: usize,
        /// Pending assignments at the time of rejection.
        pending: usize,
    },

    /// The assignment stayed bound to a worker past its deadline.
    Timeout(Duration),

    /// The worker reported an error for this assignment.
    Execution(String),

    /// The worker bound to this assignment failed as a whole.
    WorkerFault(String),

    /// The pool has been cleared or has no workers left.
    Shutdown,

    /// The scheduler went away without settling the assignment.
    ChannelClosed,
}

impl PoolError {
    /// Check if this is a queue full error.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, PoolError::QueueFull { .. })
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout(_))
    }

    /// Check if this is a shutdown error.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PoolError::Shutdown)
    }

    /// Check if the bound worker faulted.
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, PoolError::WorkerFault(_))
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::QueueFull { capacity, pending } => {
                write!(f, "queue full: {}/{} pending assignments", pending, capacity)
            }
            PoolError::Timeout(duration) => {
                write!(f, "assignment timeout after {}ms", duration.as_millis())
            }
            PoolError::Execution(msg) => {
                write!(f, "execution error: {}", msg)
            }
            PoolError::WorkerFault(msg) => {
                write!(f, "worker fault: {}", msg)
            }
            PoolError::Shutdown => {
                write!(f, "pool has been shut down")
            }
            PoolError::ChannelClosed => {
                write!(f, "scheduler channel closed unexpectedly")
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_full() {
        let err = PoolError::QueueFull {
            capacity: 1,
            pending: 1,
        };
        assert!(err.is_queue_full());
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "queue full: 1/1 pending assignments");
    }

    #[test]
    fn test_timeout() {
        let err = PoolError::Timeout(Duration::from_millis(100));
        assert!(err.is_timeout());
        assert!(!err.is_queue_full());
        assert!(err.to_string().contains("100ms"));
    }

    #[test]
    fn test_worker_fault() {
        let err = PoolError::WorkerFault("exited".to_string());
        assert!(err.is_worker_fault());
        assert!(!err.is_shutdown());
        assert_eq!(err.to_string(), "worker fault: exited");
    }
}
