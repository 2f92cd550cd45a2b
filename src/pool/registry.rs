//! Idle and active worker bookkeeping.
//!
//! A worker lives in exactly one of the two collections while the pool is
//! online. Idle workers are reused oldest-first: releases append at the tail,
//! matches take from the head.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::oneshot;
use tokio_util::time::delay_queue;

use super::error::{PoolError, PoolResult};
use super::queue::AssignmentId;
use crate::backend::WorkerKey;

/// A worker together with its pool-local key.
pub(crate) struct Slot<W> {
    pub key: WorkerKey,
    pub worker: W,
}

/// A worker bound to an assignment.
pub(crate) struct Active<W, O> {
    pub worker: W,
    pub assignment: AssignmentId,
    pub reply: oneshot::Sender<PoolResult<O>>,
    pub deadline: delay_queue::Key,
    pub bound_at: Instant,
}

impl<W, O> Active<W, O> {
    /// Settle the bound assignment and hand back the worker.
    pub fn settle(self, result: PoolResult<O>) -> W {
        let _ = self.reply.send(result);
        self.worker
    }
}

pub(crate) struct WorkerRegistry<W, O> {
    idle: VecDeque<Slot<W>>,
    active: HashMap<WorkerKey, Active<W, O>>,
}

impl<W, O> WorkerRegistry<W, O> {
    pub fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active: HashMap::new(),
        }
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn len(&self) -> usize {
        self.idle.len() + self.active.len()
    }

    /// Assignment bound to `key`, if the worker is active.
    pub fn bound_assignment(&self, key: WorkerKey) -> Option<AssignmentId> {
        self.active.get(&key).map(|active| active.assignment)
    }

    /// Return a worker to the tail of the idle set.
    pub fn release(&mut self, key: WorkerKey, worker: W) {
        debug_assert!(!self.active.contains_key(&key));
        self.idle.push_back(Slot { key, worker });
    }

    /// Take the longest-idle worker.
    pub fn pop_idle(&mut self) -> Option<Slot<W>> {
        self.idle.pop_front()
    }

    pub fn remove_idle(&mut self, key: WorkerKey) -> Option<W> {
        let index = self.idle.iter().position(|slot| slot.key == key)?;
        self.idle.remove(index).map(|slot| slot.worker)
    }

    pub fn bind(&mut self, key: WorkerKey, active: Active<W, O>) {
        self.active.insert(key, active);
    }

    /// Remove the active record, if the worker has one.
    pub fn unbind(&mut self, key: WorkerKey) -> Option<Active<W, O>> {
        self.active.remove(&key)
    }

    /// Idle workers in reuse order.
    pub fn idle(&self) -> impl Iterator<Item = &Slot<W>> {
        self.idle.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = (&WorkerKey, &Active<W, O>)> {
        self.active.iter()
    }

    /// Empty both collections, rejecting every bound assignment with `err`.
    ///
    /// Returns every worker so the caller can destroy it.
    pub fn drain(&mut self, err: &PoolError) -> Vec<(WorkerKey, W)> {
        let mut workers: Vec<(WorkerKey, W)> = self
            .idle
            .drain(..)
            .map(|slot| (slot.key, slot.worker))
            .collect();
        for (key, active) in self.active.drain() {
            workers.push((key, active.settle(Err(err.clone()))));
        }
        workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::time::DelayQueue;

    fn active(
        timers: &mut DelayQueue<WorkerKey>,
        key: WorkerKey,
        worker: &'static str,
    ) -> (Active<&'static str, u32>, oneshot::Receiver<PoolResult<u32>>) {
        let (reply, rx) = oneshot::channel();
        let record = Active {
            worker,
            assignment: AssignmentId(key.0),
            reply,
            deadline: timers.insert(key, Duration::from_secs(1)),
            bound_at: Instant::now(),
        };
        (record, rx)
    }

    #[test]
    fn test_idle_reuse_is_oldest_first() {
        let mut registry: WorkerRegistry<&str, u32> = WorkerRegistry::new();
        registry.release(WorkerKey(0), "a");
        registry.release(WorkerKey(1), "b");

        let first = registry.pop_idle().unwrap();
        assert_eq!(first.key, WorkerKey(0));
        registry.release(first.key, first.worker);

        assert_eq!(registry.pop_idle().unwrap().key, WorkerKey(1));
        assert_eq!(registry.pop_idle().unwrap().key, WorkerKey(0));
        assert!(registry.pop_idle().is_none());
    }

    #[test]
    fn test_remove_idle_by_key() {
        let mut registry: WorkerRegistry<&str, u32> = WorkerRegistry::new();
        registry.release(WorkerKey(0), "a");
        registry.release(WorkerKey(1), "b");
        registry.release(WorkerKey(2), "c");

        assert_eq!(registry.remove_idle(WorkerKey(1)), Some("b"));
        assert_eq!(registry.remove_idle(WorkerKey(1)), None);
        let keys: Vec<_> = registry.idle().map(|slot| slot.key).collect();
        assert_eq!(keys, vec![WorkerKey(0), WorkerKey(2)]);
    }

    #[tokio::test]
    async fn test_bind_and_unbind() {
        let mut timers = DelayQueue::new();
        let mut registry: WorkerRegistry<&str, u32> = WorkerRegistry::new();
        let (record, rx) = active(&mut timers, WorkerKey(4), "w");

        registry.bind(WorkerKey(4), record);
        assert_eq!(registry.bound_assignment(WorkerKey(4)), Some(AssignmentId(4)));
        assert_eq!(registry.len(), 1);

        let record = registry.unbind(WorkerKey(4)).unwrap();
        assert!(registry.unbind(WorkerKey(4)).is_none());
        assert_eq!(record.settle(Ok(9)), "w");
        assert_eq!(rx.await.unwrap(), Ok(9));
    }

    #[tokio::test]
    async fn test_drain_rejects_active() {
        let mut timers = DelayQueue::new();
        let mut registry: WorkerRegistry<&str, u32> = WorkerRegistry::new();
        registry.release(WorkerKey(0), "idle");
        let (record, rx) = active(&mut timers, WorkerKey(1), "busy");
        registry.bind(WorkerKey(1), record);

        let mut drained = registry.drain(&PoolError::Shutdown);
        drained.sort_by_key(|(key, _)| *key);

        assert_eq!(drained, vec![(WorkerKey(0), "idle"), (WorkerKey(1), "busy")]);
        assert_eq!(registry.len(), 0);
        assert_eq!(rx.await.unwrap(), Err(PoolError::Shutdown));
    }
}
