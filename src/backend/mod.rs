//! Worker backends for the pool scheduler.
//!
//! The scheduler never spawns anything itself. It drives a [`WorkerBackend`]
//! through three primitive operations and listens to each worker through the
//! [`WorkerNotifier`] it hands out at creation time.
//!
//! # Available Backends
//!
//! | Backend | Worker | Identity |
//! |---------|--------|----------|
//! | [`ThreadBackend`] | dedicated OS thread running a handler | thread index |
//! | [`ProcessBackend`] | child process speaking JSON lines | OS pid |
//!
//! # Notification Flow
//!
//! ```text
//! ┌───────────┐ activate_worker ┌──────────┐
//! │ Scheduler │────────────────▶│  Worker  │
//! └─────▲─────┘                 └────┬─────┘
//!       │    WorkerNotifier          │
//!       └────────────────────────────┘
//!        output / error / fault
//! ```

mod process;
pub mod protocol;
mod thread;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::pool::AssignmentId;

pub use process::{ProcessBackend, ProcessOptions, ProcessWorker};
pub use thread::{ThreadBackend, ThreadWorker};

/// Pool-local identity of a worker, stable for the worker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerKey(pub(crate) u64);

impl WorkerKey {
    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// What a worker reports back to the scheduler.
///
/// Output and errors carry the assignment they answer, so a late answer for
/// an assignment that already timed out is never credited to the next one.
#[derive(Debug)]
pub enum WorkerReport<O> {
    /// The assignment finished with an output.
    Output {
        assignment: AssignmentId,
        output: O,
    },
    /// The assignment failed; the worker itself is healthy.
    ///
    /// `None` means the worker could not tell which input failed, and the
    /// error goes to whatever assignment is currently bound.
    Error {
        assignment: Option<AssignmentId>,
        message: String,
    },
    /// The worker is unusable (crashed, exited, broken pipe).
    Fault(String),
}

/// A report tagged with the worker it came from.
#[derive(Debug)]
pub(crate) struct Notification<O> {
    pub key: WorkerKey,
    pub report: WorkerReport<O>,
}

/// Per-worker notification channel into the scheduler.
///
/// Reports sent after the pool is cleared are dropped silently.
pub struct WorkerNotifier<O> {
    key: WorkerKey,
    tx: mpsc::UnboundedSender<Notification<O>>,
}

impl<O> Clone for WorkerNotifier<O> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            tx: self.tx.clone(),
        }
    }
}

impl<O> WorkerNotifier<O> {
    pub(crate) fn new(key: WorkerKey, tx: mpsc::UnboundedSender<Notification<O>>) -> Self {
        Self { key, tx }
    }

    /// The worker this notifier belongs to.
    pub fn key(&self) -> WorkerKey {
        self.key
    }

    /// Report an assignment's output.
    pub fn output(&self, assignment: AssignmentId, output: O) {
        self.send(WorkerReport::Output { assignment, output });
    }

    /// Report a task-level error.
    pub fn error(&self, assignment: impl Into<Option<AssignmentId>>, message: impl Into<String>) {
        self.send(WorkerReport::Error {
            assignment: assignment.into(),
            message: message.into(),
        });
    }

    /// Report that the worker itself is broken.
    pub fn fault(&self, message: impl Into<String>) {
        self.send(WorkerReport::Fault(message.into()));
    }

    /// Returns true once the scheduler stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, report: WorkerReport<O>) {
        let _ = self.tx.send(Notification {
            key: self.key,
            report,
        });
    }
}

/// Error raised by a backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub message: String,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for BackendError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Transport that creates, destroys and feeds workers.
///
/// Implementations own the mechanics of a worker (thread, process, ...).
/// The pool scheduler only ever calls these operations from its own task,
/// except `create_worker`, which runs on a separate creation task.
#[async_trait]
pub trait WorkerBackend: Send + Sync + 'static {
    /// Handle to one execution unit.
    type Worker: Send + 'static;

    /// Unit of work handed to a worker.
    type Input: Send + 'static;

    /// Result reported by a worker.
    type Output: Send + 'static;

    /// Creates a worker and returns once it can receive input.
    ///
    /// The worker must report through `notifier` for its whole lifetime.
    async fn create_worker(
        &self,
        notifier: WorkerNotifier<Self::Output>,
    ) -> Result<Self::Worker, BackendError>;

    /// Terminates a worker. Must be safe while the worker is mid-task.
    fn destroy_worker(&self, worker: Self::Worker);

    /// Hands one input to an idle worker.
    ///
    /// The worker answers through its notifier, quoting `assignment`.
    fn activate_worker(
        &self,
        worker: &mut Self::Worker,
        assignment: AssignmentId,
        input: Self::Input,
    ) -> Result<(), BackendError>;

    /// Numeric OS-level identity for diagnostics (pid, thread index).
    fn worker_id(&self, worker: &Self::Worker) -> Option<u64>;

    /// Returns the name of this backend for logging purposes.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier_tags_reports_with_key() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = WorkerNotifier::new(WorkerKey(7), tx);

        notifier.output(AssignmentId(3), 42u32);
        notifier.error(None, "bad input");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.key, WorkerKey(7));
        assert!(matches!(
            first.report,
            WorkerReport::Output { assignment: AssignmentId(3), output: 42 }
        ));

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.report,
            WorkerReport::Error { assignment: None, ref message } if message == "bad input"
        ));
    }

    #[test]
    fn test_notifier_after_close_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel::<Notification<u32>>();
        let notifier = WorkerNotifier::new(WorkerKey(1), tx);
        drop(rx);

        assert!(notifier.is_closed());
        notifier.fault("gone");
    }

    #[test]
    fn test_worker_key_display() {
        assert_eq!(WorkerKey(3).to_string(), "w3");
    }
}
