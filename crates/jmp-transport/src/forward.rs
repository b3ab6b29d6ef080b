//! Bidirectional forwarding between two [`ByteStream`](crate::ByteStream)s.
//!
//! This is the one forwarder used throughout the system: the exporter forwards between its
//! local session Unix socket and a router stream, and the router forwards between an
//! exporter-side and a client-side `Stream` bidi call. Both cases reduce to this function.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::BoxedByteStream;

pub struct ForwardResult {
    pub a_to_b_bytes: u64,
    pub b_to_a_bytes: u64,
}

/// Spawns one copy task per direction. When a task observes end-of-stream on its source, it
/// sends `send_eof` to the destination and returns; `forward_streams` waits for both tasks to
/// finish draining before returning itself.
pub async fn forward_streams(a: BoxedByteStream, b: BoxedByteStream) -> Result<ForwardResult> {
    let a = Arc::new(Mutex::new(a));
    let b = Arc::new(Mutex::new(b));

    let a_to_b = tokio::spawn(copy_direction(Arc::clone(&a), Arc::clone(&b)));
    let b_to_a = tokio::spawn(copy_direction(Arc::clone(&b), Arc::clone(&a)));

    let a_to_b_bytes = a_to_b.await.context("a→b copy task panicked")??;
    let b_to_a_bytes = b_to_a.await.context("b→a copy task panicked")??;

    Ok(ForwardResult {
        a_to_b_bytes,
        b_to_a_bytes,
    })
}

async fn copy_direction(src: Arc<Mutex<BoxedByteStream>>, dst: Arc<Mutex<BoxedByteStream>>) -> Result<u64> {
    let mut transferred = 0u64;

    loop {
        let chunk = {
            let mut src = src.lock().await;
            src.receive().await.context("receive failed")?
        };

        match chunk {
            Some(data) => {
                transferred += data.len() as u64;
                let mut dst = dst.lock().await;
                dst.send(data).await.context("send failed")?;
            }
            None => {
                let mut dst = dst.lock().await;
                // The peer may already be gone; a failure here just means it closed first.
                let _ = dst.send_eof().await;
                break;
            }
        }
    }

    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::bytestream::memory_pipe;
    use crate::ByteStream;

    #[tokio::test]
    async fn forwards_bytes_and_propagates_eof() {
        let (mut client_a, server_a) = memory_pipe(4096);
        let (server_b, mut client_b) = memory_pipe(4096);

        let forwarder = tokio::spawn(forward_streams(server_a, server_b));

        client_a.send(Bytes::from_static(b"hello")).await.unwrap();
        client_a.send_eof().await.unwrap();

        let received = client_b.receive().await.unwrap();
        assert_eq!(received, Some(Bytes::from_static(b"hello")));
        assert_eq!(client_b.receive().await.unwrap(), None);

        client_b.send_eof().await.unwrap();

        let result = forwarder.await.unwrap().unwrap();
        assert_eq!(result.a_to_b_bytes, 5);
        assert_eq!(result.b_to_a_bytes, 0);
    }
}
