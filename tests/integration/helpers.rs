//! Test helpers and utilities

use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::Value;
use tokio_workers::backend::{ProcessBackend, ProcessOptions};
use tokio_workers::pool::{PoolOptions, WorkerPool};

pub type EchoPool = WorkerPool<ProcessBackend<Value, Value>>;

/// Launch options for the `echo_worker` binary.
pub fn echo_worker() -> ProcessOptions {
    ProcessOptions::new(env!("CARGO_BIN_EXE_echo_worker"))
}

/// Pool options with an exact worker count.
pub fn pool_options(workers: usize) -> PoolOptions {
    PoolOptions::new()
        .with_name("it")
        .with_base_size(workers)
        .with_oversubscribe(true)
}

/// Build an online pool of `echo_worker` processes.
pub async fn echo_pool(options: PoolOptions) -> EchoPool {
    let pool = WorkerPool::new(ProcessBackend::new(echo_worker()), options);
    pool.online().await.expect("echo pool should come online");
    pool
}

/// Worker pids in the order the pool reports them.
#[allow(dead_code)]
pub async fn worker_pids(pool: &EchoPool) -> Vec<u64> {
    pool.stats()
        .await
        .expect("stats")
        .workers
        .iter()
        .filter_map(|w| w.os_id)
        .collect()
}

/// Run the `tokio_workers` binary with `env`, feed it `input` and parse every
/// stdout line as JSON.
pub fn run_binary(env: &[(&str, &str)], input: &str) -> Vec<Value> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tokio_workers"))
        .env("LOG_LEVEL", "error")
        .envs(env.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn tokio_workers");

    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("Failed to write input");

    let output = child.wait_with_output().expect("tokio_workers failed");
    assert!(output.status.success(), "tokio_workers exited with {}", output.status);

    String::from_utf8(output.stdout)
        .expect("utf-8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("JSON result line"))
        .collect()
}
