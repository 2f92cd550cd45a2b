//! FIFO backlog of assignments waiting for a worker.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use tokio::sync::oneshot;

use super::error::{PoolError, PoolResult};

/// Identity of a submitted assignment, increasing in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssignmentId(pub(crate) u64);

impl AssignmentId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for AssignmentId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// An assignment not yet bound to a worker.
pub(crate) struct Pending<I, O> {
    pub id: AssignmentId,
    pub input: I,
    pub reply: oneshot::Sender<PoolResult<O>>,
    /// When the assignment was queued.
    pub queued_at: Instant,
}

impl<I, O> Pending<I, O> {
    /// Settle the assignment with an error; a caller that went away is ignored.
    pub fn reject(self, err: PoolError) {
        let _ = self.reply.send(Err(err));
    }
}

/// Bounded or unbounded FIFO of pending assignments.
pub(crate) struct PendingQueue<I, O> {
    entries: VecDeque<Pending<I, O>>,
    capacity: Option<usize>,
}

impl<I, O> PendingQueue<I, O> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails with `QueueFull` once `len >= capacity`.
    pub fn check_capacity(&self) -> PoolResult<()> {
        match self.capacity {
            Some(capacity) if self.entries.len() >= capacity => Err(PoolError::QueueFull {
                capacity,
                pending: self.entries.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Append at the tail. Capacity is the caller's responsibility.
    pub fn push(&mut self, entry: Pending<I, O>) {
        self.entries.push_back(entry);
    }

    /// Take the oldest submission.
    pub fn pop(&mut self) -> Option<Pending<I, O>> {
        self.entries.pop_front()
    }

    /// Reject every queued assignment with `err`, oldest first.
    pub fn reject_all(&mut self, err: &PoolError) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            entry.reject(err.clone());
        }
        count
    }
}
