//! Worker pool scheduler.
//!
//! Matches submitted assignments to a fixed set of workers supplied by a
//! [`WorkerBackend`], enforces a per-assignment deadline and settles every
//! assignment exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                            │
//! ├────────────────────────────────────────────────────────────┤
//! │   assign() ──▶ ┌───────────────┐                           │
//! │                │ command chan  │                           │
//! │                └───────┬───────┘                           │
//! │                ┌───────▼───────────────────────────┐       │
//! │                │ scheduler task                    │       │
//! │                │  pending queue (FIFO, bounded)    │       │
//! │                │  idle workers (oldest first)      │       │
//! │                │  active workers + DelayQueue      │       │
//! │                └───────┬──────────────────▲────────┘       │
//! │        activate_worker │                  │ WorkerNotifier │
//! │  ┌─────────┐    ┌──────▼──┐    ┌─────────┐│                │
//! │  │ Worker1 │    │ Worker2 │    │ Worker3 ├┘  ...           │
//! │  └─────────┘    └─────────┘    └─────────┘                 │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! All queue, registry and timer state is owned by the scheduler task, so it
//! needs no locking. Callers only hold channels into it.

mod error;
mod options;
mod queue;
mod registry;
mod scheduler;

pub use error::{PoolError, PoolResult};
pub use options::{FaultPolicy, PoolOptions, TimeoutPolicy, DEFAULT_TIMEOUT, MAX_TIMEOUT};
pub use queue::AssignmentId;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::backend::{WorkerBackend, WorkerKey};
use queue::Pending;
use scheduler::{Command, Scheduler};

/// Capacity of the lifecycle event broadcast.
const EVENT_CAPACITY: usize = 64;

/// Pool lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PoolState {
    /// Initial workers are still being created.
    #[default]
    Starting,
    /// All initial workers were created.
    Online,
    /// `clear()` tore the pool down.
    Cleared,
    /// No workers are left and none are being created.
    Failed,
}

impl PoolState {
    /// Returns true once the pool no longer accepts work.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoolState::Cleared | PoolState::Failed)
    }
}

/// Lifecycle notifications published by the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    WorkerReady {
        key: WorkerKey,
        os_id: Option<u64>,
    },
    Online {
        workers: usize,
    },
    WorkerFault {
        key: WorkerKey,
        message: String,
    },
    AssignmentTimedOut {
        assignment: AssignmentId,
        key: WorkerKey,
    },
    Cleared,
    Failed,
}

/// Diagnostic view of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub key: WorkerKey,
    /// Process id or thread index, as reported by the backend.
    pub os_id: Option<u64>,
    /// Assignment currently bound to the worker.
    pub assignment: Option<AssignmentId>,
}

impl WorkerInfo {
    pub fn is_busy(&self) -> bool {
        self.assignment.is_some()
    }
}

/// Snapshot of the pool's bookkeeping and counters.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub state: PoolState,
    /// Idle workers first (in reuse order), then active ones.
    pub workers: Vec<WorkerInfo>,
    pub idle: usize,
    pub active: usize,
    pub pending: usize,
    /// Worker creations in flight.
    pub creating: usize,
    /// Assignments resolved with an output.
    pub completed: u64,
    /// Assignments rejected with a task error.
    pub failed: u64,
    /// Assignments that exceeded their deadline.
    pub timeouts: u64,
    /// Submissions rejected because the queue was full.
    pub rejected: u64,
    /// Worker faults, including failed activations.
    pub faults: u64,
    /// Replacement workers requested.
    pub replaced: u64,
    pub create_failures: u64,
}

/// Caller-side handle of a submitted assignment.
///
/// Resolves to the worker's output or the error the assignment settled with.
/// Dropping it does not withdraw the work.
#[must_use = "an assignment does nothing observable unless awaited"]
pub struct Assignment<O> {
    id: AssignmentId,
    reply: Reply<O>,
}

enum Reply<O> {
    Waiting(oneshot::Receiver<PoolResult<O>>),
    Rejected(Option<PoolError>),
}

impl<O> Assignment<O> {
    fn rejected(id: AssignmentId, err: PoolError) -> Self {
        Self {
            id,
            reply: Reply::Rejected(Some(err)),
        }
    }

    /// Submission-ordered identity of this assignment.
    pub fn id(&self) -> AssignmentId {
        self.id
    }
}

impl<O> Future for Assignment<O> {
    type Output = PoolResult<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().reply {
            Reply::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(PoolError::ChannelClosed))),
            Reply::Rejected(err) => Poll::Ready(Err(err.take().unwrap_or(PoolError::Shutdown))),
        }
    }
}

/// A pool of workers driven by a [`WorkerBackend`].
///
/// Dropping the pool clears it.
pub struct WorkerPool<B: WorkerBackend> {
    commands: mpsc::UnboundedSender<Command<B>>,
    state: watch::Receiver<PoolState>,
    events: broadcast::Sender<PoolEvent>,
    next_assignment: AtomicU64,
    name: String,
    base_size: usize,
    timeout: Duration,
    max_pending: Option<usize>,
    backend_name: &'static str,
}

impl<B: WorkerBackend> WorkerPool<B> {
    /// Build a pool and start creating its workers in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(backend: B, options: PoolOptions) -> Self {
        let base_size = options.resolved_base_size();
        let backend = Arc::new(backend);
        let backend_name = backend.name();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PoolState::Starting);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::info!(
            pool = %options.name,
            backend = backend_name,
            workers = base_size,
            timeout_ms = options.timeout.as_millis() as u64,
            max_pending = ?options.max_pending,
            "worker pool starting"
        );

        let pool = Self {
            commands: commands.clone(),
            state,
            events: events.clone(),
            next_assignment: AtomicU64::new(0),
            name: options.name.clone(),
            base_size,
            timeout: options.timeout,
            max_pending: options.max_pending,
            backend_name,
        };

        let scheduler = Scheduler::new(backend, options, base_size, commands, command_rx, state_tx, events);
        tokio::spawn(scheduler.run());

        pool
    }

    /// Submit one unit of work.
    ///
    /// Fails with [`PoolError::QueueFull`] when the pending queue is at
    /// capacity, and with [`PoolError::Shutdown`] once the pool is cleared.
    pub fn assign(&self, input: B::Input) -> Assignment<B::Output> {
        let id = AssignmentId(self.next_assignment.fetch_add(1, Ordering::SeqCst));
        let (reply, rx) = oneshot::channel();
        let pending = Pending {
            id,
            input,
            reply,
            queued_at: Instant::now(),
        };

        if self.commands.send(Command::Assign(pending)).is_err() {
            return Assignment::rejected(id, PoolError::Shutdown);
        }

        Assignment {
            id,
            reply: Reply::Waiting(rx),
        }
    }

    /// Tear the pool down: destroy every worker and reject all unsettled
    /// assignments with [`PoolError::Shutdown`].
    pub fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }

    /// Wait for the initial workers to be created.
    pub async fn online(&self) -> PoolResult<()> {
        let mut state = self.state.clone();
        let reached = *state
            .wait_for(|s| *s != PoolState::Starting)
            .await
            .map_err(|_| PoolError::ChannelClosed)?;

        match reached {
            PoolState::Online => Ok(()),
            _ => Err(PoolError::Shutdown),
        }
    }

    /// Wait until the pool is cleared or failed.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(PoolState::is_terminal).await;
    }

    pub fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == PoolState::Online
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Snapshot the scheduler's bookkeeping.
    pub async fn stats(&self) -> PoolResult<PoolStats> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| PoolError::Shutdown)?;
        rx.await.map_err(|_| PoolError::Shutdown)
    }

    /// Get the pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers the pool was started with.
    pub fn base_size(&self) -> usize {
        self.base_size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_pending(&self) -> Option<usize> {
        self.max_pending
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }
}

impl<B: WorkerBackend> Drop for WorkerPool<B> {
    fn drop(&mut self) {
        self.clear();
    }
}
