//! Line protocol between the pool and a worker process.
//!
//! One JSON object per line on the child's stdin and stdout:
//!
//! ```text
//! parent → child   {"type":"input","id":3,"data":{...}}
//!                  {"type":"terminate"}
//! child → parent   {"type":"ready","pid":4242}
//!                  {"type":"output","id":3,"data":{...}}
//!                  {"type":"error","id":3,"message":"..."}
//! ```
//!
//! Stdout lines that are not protocol messages are passed through to the log,
//! so a worker that prints debugging output does not break the pool.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Message written to a worker's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentMessage<I> {
    Input { id: u64, data: I },
    Terminate,
}

/// Message read from a worker's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage<O> {
    Ready {
        pid: u32,
    },
    Output {
        id: u64,
        data: O,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        message: String,
    },
}

/// Outcome of decoding one stdout line.
#[derive(Debug, PartialEq)]
pub enum Decoded<T> {
    /// A well-formed protocol message.
    Message(T),
    /// Tagged as a protocol message but the payload did not fit.
    Malformed(String),
    /// Not a protocol line at all.
    Passthrough,
}

/// Serialize a message as one line, newline included.
pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line.
///
/// Only JSON objects carrying a string `type` field count as protocol
/// traffic; anything else is passthrough.
pub fn decode<T: DeserializeOwned>(line: &str) -> Decoded<T> {
    let line = line.trim();
    if !line.starts_with('{') {
        return Decoded::Passthrough;
    }

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return Decoded::Passthrough,
    };
    if !value.get("type").is_some_and(serde_json::Value::is_string) {
        return Decoded::Passthrough;
    }

    match serde_json::from_value(value) {
        Ok(message) => Decoded::Message(message),
        Err(e) => Decoded::Malformed(e.to_string()),
    }
}
