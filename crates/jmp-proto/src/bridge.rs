//! Adapts the generated `Frame` wire type onto [`jmp_transport::ByteStream`].
//!
//! Used on both sides of a router tunnel: the exporter's own `RouterService` client call (dialing
//! out to the external relay) and the exporter's locally served `ExporterService::Stream` handler
//! are each a gRPC bidi call carrying `{payload, close_write}` frames that need to look like an
//! ordinary byte stream to the forwarder.

use bytes::Bytes;
use futures_util::StreamExt as _;
use jmp_transport::{BoxedByteStream, ChannelByteStream, ChannelItem};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;

use crate::Frame;

/// Wraps an inbound `Streaming<Frame>` plus a fresh outbound channel into a [`BoxedByteStream`].
/// The stream ends (yields `None` to the `ByteStream` consumer) as soon as a `close_write` frame
/// is observed; that frame itself carries no payload and is not forwarded.
pub fn byte_stream_from_frames(frames: Streaming<Frame>) -> (BoxedByteStream, mpsc::Receiver<ChannelItem>) {
    let (tx, rx) = mpsc::channel(64);

    let bytes = frames
        .take_while(|item| {
            let keep_going = !matches!(item, Ok(frame) if frame.close_write);
            async move { keep_going }
        })
        .map(|item| match item {
            Ok(frame) => Ok(Bytes::from(frame.payload)),
            Err(status) => Err(std::io::Error::other(status.to_string())),
        });

    (Box::new(ChannelByteStream::new(bytes, tx)), rx)
}

/// Turns the receiving half produced by [`byte_stream_from_frames`] into the `Stream<Item =
/// Result<Frame, Status>>` tonic expects as a bidi response body.
pub fn frame_stream_from_channel(rx: mpsc::Receiver<ChannelItem>) -> impl futures_core::Stream<Item = Result<Frame, tonic::Status>> {
    ReceiverStream::new(rx).map(|item| {
        Ok(match item {
            ChannelItem::Data(payload) => Frame {
                payload: payload.to_vec(),
                close_write: false,
            },
            ChannelItem::Eof => Frame {
                payload: Vec::new(),
                close_write: true,
            },
        })
    })
}
