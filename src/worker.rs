//! Child side of the process protocol.
//!
//! A worker program calls [`serve`] with its handler and returns when the
//! pool sends `terminate` or closes stdin:
//!
//! ```ignore
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> std::io::Result<()> {
//!     tokio_workers::worker::serve(|n: u64| async move { Ok::<_, String>(n * 2) }).await
//! }
//! ```

use std::future::Future;
use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::backend::protocol::{self, ChildMessage, Decoded, ParentMessage};

/// Serve the pool over stdin and stdout.
pub async fn serve<I, O, F, Fut>(handler: F) -> io::Result<()>
where
    I: DeserializeOwned,
    O: Serialize,
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<O, String>>,
{
    serve_io(tokio::io::stdin(), tokio::io::stdout(), handler).await
}

/// Serve the pool over an arbitrary reader and writer.
///
/// Inputs are handled one at a time; the pool never sends a second input
/// before the first is answered.
pub async fn serve_io<R, W, I, O, F, Fut>(reader: R, mut writer: W, mut handler: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    I: DeserializeOwned,
    O: Serialize,
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<O, String>>,
{
    send(&mut writer, &ChildMessage::<O>::Ready { pid: std::process::id() }).await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let reply = match protocol::decode::<ParentMessage<I>>(&line) {
            Decoded::Message(ParentMessage::Input { id, data }) => match handler(data).await {
                Ok(output) => ChildMessage::Output { id, data: output },
                Err(message) => ChildMessage::Error {
                    id: Some(id),
                    message,
                },
            },
            Decoded::Message(ParentMessage::Terminate) => break,
            Decoded::Malformed(e) => ChildMessage::Error {
                id: None,
                message: format!("invalid input: {}", e),
            },
            Decoded::Passthrough => continue,
        };

        match protocol::encode(&reply) {
            Ok(line) => writer.write_all(line.as_bytes()).await?,
            Err(e) => {
                let id = match reply {
                    ChildMessage::Output { id, .. } => Some(id),
                    _ => None,
                };
                let fallback = ChildMessage::<O>::Error {
                    id,
                    message: format!("failed to encode output: {}", e),
                };
                send(&mut writer, &fallback).await?;
            }
        }
        writer.flush().await?;
    }

    Ok(())
}

async fn send<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = protocol::encode(message).map_err(io::Error::other)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
