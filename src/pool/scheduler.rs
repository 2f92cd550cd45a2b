//! The scheduler task.
//!
//! One task owns the pending queue, the worker registry and the deadline
//! timers. Every scheduling decision runs synchronously in reaction to one
//! event: a command from the pool handle, a report from a worker, or an
//! expired deadline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

use super::error::{PoolError, PoolResult};
use super::options::{FaultPolicy, PoolOptions, TimeoutPolicy, MAX_TIMEOUT};
use super::queue::{AssignmentId, Pending, PendingQueue};
use super::registry::{Active, Slot, WorkerRegistry};
use super::{PoolEvent, PoolState, PoolStats, WorkerInfo};
use crate::backend::{
    BackendError, Notification, WorkerBackend, WorkerKey, WorkerNotifier, WorkerReport,
};

/// Messages from the pool handle and the creation tasks.
pub(crate) enum Command<B: WorkerBackend> {
    Assign(Pending<B::Input, B::Output>),
    Created {
        key: WorkerKey,
        result: Result<B::Worker, BackendError>,
    },
    StartupComplete,
    Stats(oneshot::Sender<PoolStats>),
    Clear,
}

pub(crate) struct Scheduler<B: WorkerBackend> {
    backend: Arc<B>,
    options: PoolOptions,
    base_size: usize,
    queue: PendingQueue<B::Input, B::Output>,
    registry: WorkerRegistry<B::Worker, B::Output>,
    timers: DelayQueue<WorkerKey>,
    command_tx: mpsc::UnboundedSender<Command<B>>,
    commands: mpsc::UnboundedReceiver<Command<B>>,
    notify_tx: mpsc::UnboundedSender<Notification<B::Output>>,
    notifications: mpsc::UnboundedReceiver<Notification<B::Output>>,
    state: watch::Sender<PoolState>,
    events: broadcast::Sender<PoolEvent>,
    creation: CancellationToken,
    next_key: u64,
    /// Workers being created, with any fault reported before registration.
    starting: HashMap<WorkerKey, Option<String>>,
    /// Workers reclaimed after a timeout; their old input may still answer.
    timed_out: HashSet<WorkerKey>,
    stats: PoolStats,
}

impl<B: WorkerBackend> Scheduler<B> {
    pub fn new(
        backend: Arc<B>,
        mut options: PoolOptions,
        base_size: usize,
        command_tx: mpsc::UnboundedSender<Command<B>>,
        commands: mpsc::UnboundedReceiver<Command<B>>,
        state: watch::Sender<PoolState>,
        events: broadcast::Sender<PoolEvent>,
    ) -> Self {
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        options.timeout = options.timeout.min(MAX_TIMEOUT);
        Self {
            backend,
            queue: PendingQueue::new(options.max_pending),
            options,
            base_size,
            registry: WorkerRegistry::new(),
            timers: DelayQueue::new(),
            command_tx,
            commands,
            notify_tx,
            notifications,
            state,
            events,
            creation: CancellationToken::new(),
            next_key: 0,
            starting: HashMap::new(),
            timed_out: HashSet::new(),
            stats: PoolStats::default(),
        }
    }

    pub async fn run(mut self) {
        self.spawn_creation(self.base_size, true);

        while !self.current_state().is_terminal() {
            tokio::select! {
                biased;

                Some(notification) = self.notifications.recv() => {
                    self.on_notification(notification);
                }
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    self.on_deadline(expired.into_inner());
                }
                Some(command) = self.commands.recv() => {
                    self.on_command(command);
                }
                else => break,
            }
        }

        self.drain_commands();
        tracing::debug!(pool = %self.options.name, "scheduler stopped");
    }

    fn current_state(&self) -> PoolState {
        *self.state.borrow()
    }

    fn set_state(&self, state: PoolState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: PoolEvent) {
        let _ = self.events.send(event);
    }

    fn on_command(&mut self, command: Command<B>) {
        match command {
            Command::Assign(pending) => self.assign(pending),
            Command::Created { key, result } => self.on_created(key, result),
            Command::StartupComplete => self.on_startup_complete(),
            Command::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Clear => self.clear(),
        }
    }

    fn assign(&mut self, pending: Pending<B::Input, B::Output>) {
        if let Err(err) = self.queue.check_capacity() {
            self.stats.rejected += 1;
            tracing::debug!(
                pool = %self.options.name,
                assignment = %pending.id,
                pending = self.queue.len(),
                "pending queue full, rejecting assignment"
            );
            pending.reject(err);
            return;
        }

        self.queue.push(pending);
        self.match_one();
    }

    /// Bind the oldest pending assignment to the longest-idle worker.
    fn match_one(&mut self) {
        if self.queue.is_empty() || self.registry.idle_len() == 0 {
            return;
        }
        let (Some(pending), Some(Slot { key, mut worker })) =
            (self.queue.pop(), self.registry.pop_idle())
        else {
            return;
        };

        let Pending {
            id,
            input,
            reply,
            queued_at,
        } = pending;

        match self.backend.activate_worker(&mut worker, id, input) {
            Ok(()) => {
                tracing::debug!(
                    pool = %self.options.name,
                    assignment = %id,
                    worker = %key,
                    queue_wait_us = queued_at.elapsed().as_micros() as u64,
                    "assignment bound"
                );
                let deadline = self.timers.insert(key, self.options.timeout);
                self.registry.bind(
                    key,
                    Active {
                        worker,
                        assignment: id,
                        reply,
                        deadline,
                        bound_at: Instant::now(),
                    },
                );
            }
            Err(err) => {
                tracing::warn!(
                    pool = %self.options.name,
                    assignment = %id,
                    worker = %key,
                    error = %err,
                    "worker activation failed"
                );
                let _ = reply.send(Err(PoolError::WorkerFault(err.message.clone())));
                self.on_fault(key, worker, err.message);
            }
        }
    }

    fn on_notification(&mut self, notification: Notification<B::Output>) {
        let Notification { key, report } = notification;
        match report {
            WorkerReport::Output { assignment, output } => {
                if self.bound_to(key, Some(assignment)) {
                    self.stats.completed += 1;
                    self.deactivate(key, Ok(output));
                } else {
                    tracing::debug!(worker = %key, assignment = %assignment, "ignoring stale output");
                }
            }
            WorkerReport::Error {
                assignment,
                message,
            } => {
                if self.bound_to(key, assignment) {
                    self.stats.failed += 1;
                    self.deactivate(key, Err(PoolError::Execution(message)));
                } else {
                    tracing::debug!(worker = %key, error = %message, "ignoring stale error");
                }
            }
            WorkerReport::Fault(message) => {
                tracing::warn!(pool = %self.options.name, worker = %key, error = %message, "worker fault");
                if let Some(active) = self.registry.unbind(key) {
                    self.timers.try_remove(&active.deadline);
                    let worker = active.settle(Err(PoolError::WorkerFault(message.clone())));
                    self.on_fault(key, worker, message);
                } else if let Some(worker) = self.registry.remove_idle(key) {
                    self.on_fault(key, worker, message);
                } else if let Some(early) = self.starting.get_mut(&key) {
                    // Applied once the creation result arrives.
                    *early = Some(message);
                }
            }
        }
    }

    /// True if `key` is active and, when given, bound to `assignment`.
    ///
    /// A report without an assignment id is only credited to workers that
    /// never outlived a deadline.
    fn bound_to(&self, key: WorkerKey, assignment: Option<AssignmentId>) -> bool {
        match (self.registry.bound_assignment(key), assignment) {
            (Some(bound), Some(reported)) => bound == reported,
            (Some(_), None) => !self.timed_out.contains(&key),
            (None, _) => false,
        }
    }

    /// Settle the worker's assignment, return it to idle and match again.
    fn deactivate(&mut self, key: WorkerKey, result: PoolResult<B::Output>) {
        let Some(active) = self.registry.unbind(key) else {
            return;
        };
        self.timers.try_remove(&active.deadline);
        tracing::debug!(
            pool = %self.options.name,
            assignment = %active.assignment,
            worker = %key,
            ok = result.is_ok(),
            elapsed_us = active.bound_at.elapsed().as_micros() as u64,
            "assignment settled"
        );
        let worker = active.settle(result);
        self.registry.release(key, worker);
        self.match_one();
    }

    fn on_deadline(&mut self, key: WorkerKey) {
        let Some(active) = self.registry.unbind(key) else {
            return;
        };
        let assignment = active.assignment;
        self.stats.timeouts += 1;
        tracing::warn!(
            pool = %self.options.name,
            assignment = %assignment,
            worker = %key,
            timeout_ms = self.options.timeout.as_millis() as u64,
            "assignment timed out"
        );
        let worker = active.settle(Err(PoolError::Timeout(self.options.timeout)));
        self.emit(PoolEvent::AssignmentTimedOut { assignment, key });

        match self.options.timeout_policy {
            TimeoutPolicy::Reclaim => {
                self.timed_out.insert(key);
                self.registry.release(key, worker);
                self.match_one();
            }
            TimeoutPolicy::Replace => {
                self.backend.destroy_worker(worker);
                self.replace_worker();
            }
        }
    }

    /// Isolate a broken worker and apply the fault policy.
    fn on_fault(&mut self, key: WorkerKey, worker: B::Worker, message: String) {
        self.stats.faults += 1;
        self.timed_out.remove(&key);
        self.backend.destroy_worker(worker);
        self.emit(PoolEvent::WorkerFault { key, message });

        match self.options.fault_policy {
            FaultPolicy::Replace => self.replace_worker(),
            FaultPolicy::Retire => self.check_exhausted(),
        }
    }

    fn replace_worker(&mut self) {
        self.stats.replaced += 1;
        self.spawn_creation(1, false);
    }

    fn on_created(&mut self, key: WorkerKey, result: Result<B::Worker, BackendError>) {
        let early_fault = self.starting.remove(&key).flatten();

        match (result, early_fault) {
            (Ok(worker), Some(message)) => {
                tracing::warn!(
                    pool = %self.options.name,
                    worker = %key,
                    error = %message,
                    "worker failed before registration"
                );
                self.on_fault(key, worker, message);
            }
            (Ok(worker), None) => {
                let os_id = self.backend.worker_id(&worker);
                tracing::debug!(pool = %self.options.name, worker = %key, os_id = ?os_id, "worker ready");
                self.registry.release(key, worker);
                self.emit(PoolEvent::WorkerReady { key, os_id });
                self.match_one();
            }
            (Err(err), _) => {
                self.stats.create_failures += 1;
                tracing::error!(
                    pool = %self.options.name,
                    worker = %key,
                    error = %err,
                    "worker creation failed"
                );
                if self.current_state() == PoolState::Online {
                    self.check_exhausted();
                }
            }
        }
    }

    fn on_startup_complete(&mut self) {
        if self.registry.len() == 0 && self.starting.is_empty() {
            self.fail();
            return;
        }

        let workers = self.registry.len();
        tracing::info!(pool = %self.options.name, workers, "worker pool online");
        self.set_state(PoolState::Online);
        self.emit(PoolEvent::Online { workers });
    }

    /// Fail the pool once nothing is left to run work on.
    fn check_exhausted(&mut self) {
        if self.current_state() == PoolState::Online
            && self.registry.len() == 0
            && self.starting.is_empty()
        {
            self.fail();
        }
    }

    fn fail(&mut self) {
        self.creation.cancel();
        let rejected = self
            .queue
            .reject_all(&PoolError::WorkerFault("no workers available".to_string()));
        tracing::error!(pool = %self.options.name, rejected, "worker pool has no workers left");
        self.set_state(PoolState::Failed);
        self.emit(PoolEvent::Failed);
    }

    fn clear(&mut self) {
        self.creation.cancel();
        self.timers.clear();
        self.starting.clear();
        self.timed_out.clear();

        let workers = self.registry.drain(&PoolError::Shutdown);
        let destroyed = workers.len();
        for (_, worker) in workers {
            self.backend.destroy_worker(worker);
        }
        let rejected = self.queue.reject_all(&PoolError::Shutdown);

        tracing::info!(pool = %self.options.name, destroyed, rejected, "worker pool cleared");
        self.set_state(PoolState::Cleared);
        self.emit(PoolEvent::Cleared);
    }

    /// Settle whatever is still queued in the command channel after stopping.
    fn drain_commands(&mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Assign(pending) => pending.reject(PoolError::Shutdown),
                Command::Created {
                    result: Ok(worker), ..
                } => self.backend.destroy_worker(worker),
                Command::Stats(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Created { .. } | Command::StartupComplete | Command::Clear => {}
            }
        }
    }

    fn snapshot(&self) -> PoolStats {
        let mut workers: Vec<WorkerInfo> = self
            .registry
            .idle()
            .map(|slot| WorkerInfo {
                key: slot.key,
                os_id: self.backend.worker_id(&slot.worker),
                assignment: None,
            })
            .collect();
        let mut active: Vec<WorkerInfo> = self
            .registry
            .active()
            .map(|(key, active)| WorkerInfo {
                key: *key,
                os_id: self.backend.worker_id(&active.worker),
                assignment: Some(active.assignment),
            })
            .collect();
        active.sort_by_key(|info| info.key);
        workers.extend(active);

        PoolStats {
            state: self.current_state(),
            workers,
            idle: self.registry.idle_len(),
            active: self.registry.active_len(),
            pending: self.queue.len(),
            creating: self.starting.len(),
            ..self.stats.clone()
        }
    }

    /// Create `count` workers one after another on a separate task.
    fn spawn_creation(&mut self, count: usize, startup: bool) {
        let keys: Vec<WorkerKey> = (0..count)
            .map(|_| {
                let key = WorkerKey(self.next_key);
                self.next_key += 1;
                key
            })
            .collect();
        self.starting.extend(keys.iter().map(|key| (*key, None)));

        tokio::spawn(create_workers(
            Arc::clone(&self.backend),
            keys,
            self.notify_tx.clone(),
            self.command_tx.clone(),
            self.creation.clone(),
            startup,
        ));
    }
}

/// Creation loop: one creation is awaited before the next is requested.
async fn create_workers<B: WorkerBackend>(
    backend: Arc<B>,
    keys: Vec<WorkerKey>,
    notify_tx: mpsc::UnboundedSender<Notification<B::Output>>,
    commands: mpsc::UnboundedSender<Command<B>>,
    cancel: CancellationToken,
    startup: bool,
) {
    for key in keys {
        let notifier = WorkerNotifier::new(key, notify_tx.clone());
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = backend.create_worker(notifier) => result,
        };

        if let Err(mpsc::error::SendError(Command::Created {
            result: Ok(worker), ..
        })) = commands.send(Command::Created { key, result })
        {
            backend.destroy_worker(worker);
            break;
        }
    }

    if startup {
        let _ = commands.send(Command::StartupComplete);
    }
}
