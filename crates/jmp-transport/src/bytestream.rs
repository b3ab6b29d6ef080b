use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

/// Uniform full-duplex byte channel.
///
/// Every transport the driver/stub protocol needs to speak (memory pipes, TCP, Unix sockets,
/// gRPC bidi call contexts, WebSocket) is adapted to this shape so the forwarder in
/// [`crate::forward`] never has to know which one it is moving bytes between.
#[async_trait]
pub trait ByteStream: Send {
    /// Send a chunk. Chunks are never split or coalesced by the implementation.
    async fn send(&mut self, data: Bytes) -> io::Result<()>;

    /// Receive the next chunk, or `Ok(None)` once the peer has half-closed (`send_eof`) and all
    /// in-flight data has been drained.
    async fn receive(&mut self) -> io::Result<Option<Bytes>>;

    /// Half-close the send direction. Ordered after all prior `send`s.
    async fn send_eof(&mut self) -> io::Result<()>;

    /// Tear down both directions immediately.
    async fn close(&mut self) -> io::Result<()>;
}

pub type BoxedByteStream = Box<dyn ByteStream>;

const CHUNK_SIZE: usize = 16 * 1024;

/// Adapts any [`AsyncRead`] + [`AsyncWrite`] type into a [`ByteStream`].
///
/// This is how memory pipes ([`tokio::io::duplex`]) and Unix session sockets are turned into
/// the same shape.
pub struct IoByteStream<T> {
    inner: T,
    read_buf: Box<[u8]>,
    eof_sent: bool,
}

impl<T> IoByteStream<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            read_buf: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            eof_sent: false,
        }
    }
}

#[async_trait]
impl<T> ByteStream for IoByteStream<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.inner.write_all(&data).await?;
        self.inner.flush().await
    }

    async fn receive(&mut self) -> io::Result<Option<Bytes>> {
        let n = self.inner.read(&mut self.read_buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(Bytes::copy_from_slice(&self.read_buf[..n])))
        }
    }

    async fn send_eof(&mut self) -> io::Result<()> {
        if !self.eof_sent {
            self.inner.shutdown().await?;
            self.eof_sent = true;
        }
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        let _ = self.send_eof().await;
        Ok(())
    }
}

/// An in-process memory pipe, used for resource uploads: the server end is stashed in the
/// session's resource table and handed to a driver call, while the client end is fed by the
/// resource stream handler.
pub fn memory_pipe(buffer: usize) -> (BoxedByteStream, BoxedByteStream) {
    let (a, b) = tokio::io::duplex(buffer);
    (Box::new(IoByteStream::new(a)), Box::new(IoByteStream::new(b)))
}

/// An item pushed through the outbound half of a [`ChannelByteStream`]. The gRPC service layer
/// (see the exporter and router crates) maps this onto the wire frame shape, where `Eof` becomes
/// a `close_write` frame.
#[derive(Debug, Clone)]
pub enum ChannelItem {
    Data(Bytes),
    Eof,
}

/// Adapter for a gRPC bidi call context, where the read and write halves are naturally separate
/// (a [`futures_core::Stream`] of inbound frames and an [`tokio::sync::mpsc::Sender`] of outbound
/// ones) rather than a single [`AsyncRead`] + [`AsyncWrite`] value.
pub struct ChannelByteStream {
    rx: Pin<Box<dyn futures_core::Stream<Item = io::Result<Bytes>> + Send>>,
    tx: tokio::sync::mpsc::Sender<ChannelItem>,
    eof_sent: bool,
}

impl ChannelByteStream {
    pub fn new<S>(rx: S, tx: tokio::sync::mpsc::Sender<ChannelItem>) -> Self
    where
        S: futures_core::Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            rx: Box::pin(rx),
            tx,
            eof_sent: false,
        }
    }
}

#[async_trait]
impl ByteStream for ChannelByteStream {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.tx
            .send(ChannelItem::Data(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped the receiving end"))
    }

    async fn receive(&mut self) -> io::Result<Option<Bytes>> {
        use futures_util::StreamExt as _;
        match self.rx.next().await {
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn send_eof(&mut self) -> io::Result<()> {
        if !self.eof_sent {
            // A broken receiver here just means the peer is already gone; `send_eof` is
            // best-effort by contract once the underlying call is torn down.
            let _ = self.tx.send(ChannelItem::Eof).await;
            self.eof_sent = true;
        }
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.send_eof().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pipe_round_trips_a_chunk_then_reports_eof() {
        let (mut a, mut b) = memory_pipe(4096);

        a.send(Bytes::from_static(b"ping")).await.unwrap();
        a.send_eof().await.unwrap();

        assert_eq!(b.receive().await.unwrap(), Some(Bytes::from_static(b"ping")));
        assert_eq!(b.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn channel_byte_stream_reads_inbound_and_reports_eof_on_drop() {
        use futures_util::stream;

        let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::channel(4);
        let inbound = stream::iter([Ok(Bytes::from_static(b"hi"))]);
        let mut byte_stream = ChannelByteStream::new(inbound, outbound_tx);

        assert_eq!(byte_stream.receive().await.unwrap(), Some(Bytes::from_static(b"hi")));
        assert_eq!(byte_stream.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn channel_byte_stream_send_forwards_data_then_eof() {
        use futures_util::stream;

        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(4);
        let inbound = stream::empty();
        let mut byte_stream = ChannelByteStream::new(inbound, outbound_tx);

        byte_stream.send(Bytes::from_static(b"hi")).await.unwrap();
        byte_stream.send_eof().await.unwrap();

        assert!(matches!(outbound_rx.recv().await, Some(ChannelItem::Data(data)) if data == Bytes::from_static(b"hi")));
        assert!(matches!(outbound_rx.recv().await, Some(ChannelItem::Eof)));
    }
}
