//! Test worker for the process backend.
//!
//! Echoes every JSON input back. Objects may carry directives:
//!
//! - `{"sleep_ms": N}` waits N milliseconds before answering
//! - `{"fail": "msg"}` answers with a task error
//! - `{"exit": code}` exits the process without answering

use std::time::Duration;

use serde_json::Value;

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    tokio_workers::worker::serve(echo).await
}

async fn echo(input: Value) -> Result<Value, String> {
    if let Some(ms) = input.get("sleep_ms").and_then(Value::as_u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    if let Some(code) = input.get("exit").and_then(Value::as_i64) {
        std::process::exit(code as i32);
    }
    if let Some(message) = input.get("fail").and_then(Value::as_str) {
        return Err(message.to_string());
    }
    Ok(input)
}
