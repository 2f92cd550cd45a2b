//! Out-of-process backend: one child process per worker.
//!
//! Each worker is spawned with `tokio::process` and speaks the JSON line
//! protocol from [`super::protocol`] over its stdin and stdout. Stderr and
//! non-protocol stdout lines are forwarded to the log.
//!
//! Four tasks serve one child:
//!
//! - writer: drains queued lines into stdin
//! - stdout reader: decodes protocol messages into notifier reports
//! - stderr forwarder
//! - supervisor: owns the `Child`, reports an unexpected exit as a fault and
//!   escalates from terminate to kill when the worker is destroyed

use std::marker::PhantomData;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::protocol::{self, ChildMessage, Decoded, ParentMessage};
use super::{BackendError, WorkerBackend, WorkerNotifier};
use crate::pool::AssignmentId;

/// Default time a child gets to report `ready`.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a child gets to exit after `terminate` before it is killed.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// How worker processes are launched.
#[derive(Clone, Debug)]
pub struct ProcessOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory (None = inherit).
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
    /// Start from an empty environment instead of inheriting the parent's.
    pub clear_env: bool,
    /// Wait for the child's `ready` message before the worker counts as
    /// created. When disabled, a successful spawn is enough.
    pub await_ready: bool,
    pub ready_timeout: Duration,
    pub terminate_grace: Duration,
}

impl ProcessOptions {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            clear_env: false,
            await_ready: true,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    pub fn with_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_clear_env(mut self, clear_env: bool) -> Self {
        self.clear_env = clear_env;
        self
    }

    pub fn with_await_ready(mut self, await_ready: bool) -> Self {
        self.await_ready = await_ready;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.clear_env {
            cmd.env_clear();
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// Handle to a worker process.
pub struct ProcessWorker<O> {
    pid: u32,
    lines: mpsc::UnboundedSender<String>,
    stop: oneshot::Sender<()>,
    notifier: WorkerNotifier<O>,
}

impl<O> ProcessWorker<O> {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Runs each worker as a child process.
pub struct ProcessBackend<I, O> {
    options: ProcessOptions,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> ProcessBackend<I, O>
where
    I: Serialize + Send + 'static,
    O: DeserializeOwned + Send + 'static,
{
    pub fn new(options: ProcessOptions) -> Self {
        Self {
            options,
            _marker: PhantomData,
        }
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    fn spawn(&self) -> Result<(Child, u32, ChildStdin, ChildStdout, ChildStderr), BackendError> {
        let program = self.options.program.display().to_string();
        let mut child = self
            .options
            .command()
            .spawn()
            .map_err(|e| BackendError::from(format!("failed to spawn {}: {}", program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| BackendError::from(format!("{} exited immediately", program)))?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(BackendError::from(format!("{} has no piped stdio", program)));
        };

        Ok((child, pid, stdin, stdout, stderr))
    }
}

/// Writes queued protocol lines to the child's stdin until the queue closes.
async fn write_lines(
    pid: u32,
    mut stdin: ChildStdin,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!(pid, error = %e, "worker stdin closed");
            return;
        }
        if let Err(e) = stdin.flush().await {
            tracing::debug!(pid, error = %e, "worker stdin closed");
            return;
        }
    }
}

/// Decodes the child's stdout into reports.
///
/// The first `ready` message completes `ready`; later ones are ignored.
async fn read_messages<O: DeserializeOwned>(
    pid: u32,
    stdout: ChildStdout,
    notifier: WorkerNotifier<O>,
    ready: oneshot::Sender<u32>,
) {
    let mut ready = Some(ready);
    let mut lines = BufReader::new(stdout).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        match protocol::decode::<ChildMessage<O>>(&line) {
            Decoded::Message(ChildMessage::Ready { pid: reported }) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(reported);
                }
            }
            Decoded::Message(ChildMessage::Output { id, data }) => {
                notifier.output(AssignmentId::from(id), data);
            }
            Decoded::Message(ChildMessage::Error { id, message }) => {
                notifier.error(id.map(AssignmentId::from), message);
            }
            Decoded::Malformed(e) => {
                tracing::warn!(pid, error = %e, "malformed worker message");
                notifier.error(None, format!("malformed worker message: {}", e));
            }
            Decoded::Passthrough => {
                tracing::info!(pid, stream = "stdout", "{}", line);
            }
        }
    }
}

async fn forward_stderr(pid: u32, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(pid, stream = "stderr", "{}", line);
    }
}

/// Owns the child until it exits.
///
/// An exit nobody asked for is a fault. A stop request (or the handle being
/// dropped) gives the child `grace` to exit on its own before it is killed.
async fn supervise<O>(
    pid: u32,
    mut child: Child,
    stop: oneshot::Receiver<()>,
    grace: Duration,
    notifier: WorkerNotifier<O>,
) {
    tokio::select! {
        status = child.wait() => {
            let message = match status {
                Ok(status) => format!("worker process {} exited unexpectedly ({})", pid, status),
                Err(e) => format!("failed to wait for worker process {}: {}", pid, e),
            };
            notifier.fault(message);
        }
        _ = stop => {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(pid, %status, "worker process exited"),
                Ok(Err(e)) => tracing::warn!(pid, error = %e, "failed to wait for worker process"),
                Err(_) => {
                    tracing::warn!(pid, grace_ms = grace.as_millis() as u64, "worker process ignored terminate, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(pid, error = %e, "failed to kill worker process");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<I, O> WorkerBackend for ProcessBackend<I, O>
where
    I: Serialize + Send + 'static,
    O: DeserializeOwned + Send + 'static,
{
    type Worker = ProcessWorker<O>;
    type Input = I;
    type Output = O;

    async fn create_worker(
        &self,
        notifier: WorkerNotifier<O>,
    ) -> Result<ProcessWorker<O>, BackendError> {
        let (child, pid, stdin, stdout, stderr) = self.spawn()?;
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(write_lines(pid, stdin, lines_rx));
        tokio::spawn(read_messages(pid, stdout, notifier.clone(), ready_tx));
        tokio::spawn(forward_stderr(pid, stderr));
        tokio::spawn(supervise(
            pid,
            child,
            stop_rx,
            self.options.terminate_grace,
            notifier.clone(),
        ));

        if self.options.await_ready {
            match tokio::time::timeout(self.options.ready_timeout, ready_rx).await {
                Ok(Ok(reported)) => {
                    if reported != pid {
                        tracing::debug!(pid, reported, "worker reported a different pid");
                    }
                }
                Ok(Err(_)) => {
                    let _ = stop_tx.send(());
                    return Err(BackendError::from(format!(
                        "worker process {} exited before reporting ready",
                        pid
                    )));
                }
                Err(_) => {
                    let _ = stop_tx.send(());
                    return Err(BackendError::from(format!(
                        "worker process {} not ready after {}ms",
                        pid,
                        self.options.ready_timeout.as_millis()
                    )));
                }
            }
        }

        tracing::debug!(pid, program = %self.options.program.display(), "worker process started");

        Ok(ProcessWorker {
            pid,
            lines: lines_tx,
            stop: stop_tx,
            notifier,
        })
    }

    fn destroy_worker(&self, worker: ProcessWorker<O>) {
        if let Ok(line) = protocol::encode(&ParentMessage::<I>::Terminate) {
            let _ = worker.lines.send(line);
        }
        let _ = worker.stop.send(());
    }

    fn activate_worker(
        &self,
        worker: &mut ProcessWorker<O>,
        assignment: AssignmentId,
        input: I,
    ) -> Result<(), BackendError> {
        let message = ParentMessage::Input {
            id: assignment.get(),
            data: input,
        };
        let line = match protocol::encode(&message) {
            Ok(line) => line,
            Err(e) => {
                // The worker is fine; only this input is unusable.
                worker
                    .notifier
                    .error(assignment, format!("failed to encode input: {}", e));
                return Ok(());
            }
        };

        worker
            .lines
            .send(line)
            .map_err(|_| BackendError::from(format!("worker process {} stdin is closed", worker.pid)))
    }

    fn worker_id(&self, worker: &ProcessWorker<O>) -> Option<u64> {
        Some(u64::from(worker.pid))
    }

    fn name(&self) -> &'static str {
        "process"
    }
}
