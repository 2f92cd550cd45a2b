//! Line-oriented pool runner.
//!
//! Reads one JSON value per stdin line, assigns it to the pool and prints one
//! result line per input, in input order:
//!
//! ```text
//! {"ok":<output>}
//! {"error":"<message>"}
//! ```

use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{FuturesOrdered, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use tokio_workers::backend::{ProcessBackend, ThreadBackend, WorkerBackend};
use tokio_workers::config::{BackendType, Config};
use tokio_workers::pool::WorkerPool;
use tokio_workers::{logging, VERSION};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
    let config = Config::from_env()?;

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Warning: logging already initialised: {}", e);
    }

    // Threads and child processes do the work; one runtime thread is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), BoxError> {
    info!(version = VERSION, "Starting tokio_workers...");
    config.log_summary();

    let options = config.pool.options();
    match config.backend.backend_type {
        BackendType::Thread => {
            let backend = ThreadBackend::new(config.pool.name.clone(), echo);
            run(WorkerPool::new(backend, options)).await
        }
        BackendType::Process => {
            let backend = ProcessBackend::<Value, Value>::new(config.backend.process_options()?);
            run(WorkerPool::new(backend, options)).await
        }
    }
}

/// Built-in handler for the thread backend.
///
/// Same directives as the `echo_worker` binary, minus `exit`.
fn echo(input: Value) -> Result<Value, String> {
    if let Some(ms) = input.get("sleep_ms").and_then(Value::as_u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
    if let Some(message) = input.get("fail").and_then(Value::as_str) {
        return Err(message.to_string());
    }
    Ok(input)
}

async fn run<B>(pool: WorkerPool<B>) -> Result<(), BoxError>
where
    B: WorkerBackend<Input = Value, Output = Value>,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut results: FuturesOrdered<BoxFuture<'static, Result<Value, String>>> =
        FuturesOrdered::new();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut input_done = false;
    let mut interrupted = false;

    while !(input_done && results.is_empty()) {
        tokio::select! {
            _ = &mut shutdown, if !interrupted => {
                warn!("interrupt received, clearing pool");
                interrupted = true;
                input_done = true;
                pool.clear();
            }
            line = lines.next_line(), if !input_done => {
                let Some(line) = line? else {
                    input_done = true;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(input) => {
                        let assignment = pool.assign(input);
                        results.push_back(
                            async move { assignment.await.map_err(|e| e.to_string()) }.boxed(),
                        );
                    }
                    Err(e) => {
                        results.push_back(future::ready(Err(format!("invalid JSON: {}", e))).boxed());
                    }
                }
            }
            Some(result) = results.next(), if !results.is_empty() => {
                let reply = match result {
                    Ok(output) => json!({ "ok": output }),
                    Err(message) => json!({ "error": message }),
                };
                stdout.write_all(format!("{}\n", reply).as_bytes()).await?;
                stdout.flush().await?;
            }
        }
    }

    if let Ok(stats) = pool.stats().await {
        info!(
            completed = stats.completed,
            failed = stats.failed,
            timeouts = stats.timeouts,
            rejected = stats.rejected,
            faults = stats.faults,
            "input exhausted"
        );
    }

    pool.clear();
    pool.closed().await;
    info!("tokio_workers exited");
    Ok(())
}
