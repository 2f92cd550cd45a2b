//! In-process backend: one dedicated OS thread per worker.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{BackendError, WorkerBackend, WorkerNotifier};
use crate::pool::AssignmentId;

/// Message sent to a worker thread.
enum ThreadMessage<I> {
    Input(AssignmentId, I),
    Terminate,
}

/// Handle to a worker thread.
pub struct ThreadWorker<I> {
    index: u64,
    tx: mpsc::Sender<ThreadMessage<I>>,
}

impl<I> ThreadWorker<I> {
    /// Sequential index of the thread within its backend.
    pub fn index(&self) -> u64 {
        self.index
    }
}

/// Runs a blocking handler on dedicated threads.
///
/// Handler errors fail only the assignment; a panic faults the worker and
/// its thread exits.
pub struct ThreadBackend<I, O, F> {
    name: String,
    handler: Arc<F>,
    next_index: AtomicU64,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> ThreadBackend<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Result<O, String> + Send + Sync + 'static,
{
    /// Create a backend whose threads are named `{name}-{index}`.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            next_index: AtomicU64::new(0),
            _marker: PhantomData,
        }
    }

    /// Get the thread name prefix.
    pub fn name_prefix(&self) -> &str {
        &self.name
    }

    /// Worker thread main loop.
    fn worker_loop(
        index: u64,
        rx: mpsc::Receiver<ThreadMessage<I>>,
        handler: Arc<F>,
        notifier: WorkerNotifier<O>,
    ) {
        tracing::debug!(worker = index, "worker thread started");

        while let Ok(message) = rx.recv() {
            let (assignment, input) = match message {
                ThreadMessage::Input(assignment, input) => (assignment, input),
                ThreadMessage::Terminate => break,
            };

            match panic::catch_unwind(AssertUnwindSafe(|| handler(input))) {
                Ok(Ok(output)) => notifier.output(assignment, output),
                Ok(Err(e)) => notifier.error(assignment, e),
                Err(payload) => {
                    notifier.fault(format!("worker thread panicked: {}", panic_message(&*payload)));
                    break;
                }
            }
        }

        tracing::debug!(worker = index, "worker thread stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[async_trait]
impl<I, O, F> WorkerBackend for ThreadBackend<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Result<O, String> + Send + Sync + 'static,
{
    type Worker = ThreadWorker<I>;
    type Input = I;
    type Output = O;

    async fn create_worker(
        &self,
        notifier: WorkerNotifier<O>,
    ) -> Result<ThreadWorker<I>, BackendError> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let thread_name = format!("{}-{}", self.name, index);
        let (tx, rx) = mpsc::channel();
        let (online_tx, online_rx) = oneshot::channel();
        let handler = Arc::clone(&self.handler);

        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let _ = online_tx.send(());
                Self::worker_loop(index, rx, handler, notifier);
            })
            .map_err(|e| BackendError::from(format!("failed to spawn {}: {}", thread_name, e)))?;

        online_rx
            .await
            .map_err(|_| BackendError::from(format!("{} exited before coming online", thread_name)))?;

        Ok(ThreadWorker { index, tx })
    }

    fn destroy_worker(&self, worker: ThreadWorker<I>) {
        // A thread cannot be killed; it exits once its current task returns.
        let _ = worker.tx.send(ThreadMessage::Terminate);
    }

    fn activate_worker(
        &self,
        worker: &mut ThreadWorker<I>,
        assignment: AssignmentId,
        input: I,
    ) -> Result<(), BackendError> {
        worker
            .tx
            .send(ThreadMessage::Input(assignment, input))
            .map_err(|_| BackendError::from(format!("{}-{} is gone", self.name, worker.index)))
    }

    fn worker_id(&self, worker: &ThreadWorker<I>) -> Option<u64> {
        Some(worker.index)
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}
