//! Uniform byte-stream abstraction and forwarding primitives.
//!
//! A [`ByteStream`] is the common shape every transport in the system is adapted to: memory
//! pipes between a driver and a resource upload, Unix session sockets, and gRPC bidi call
//! contexts. [`forward::forward_streams`] glues two of them together, propagating half-close in
//! both directions.

mod bytestream;
pub mod forward;

pub use self::bytestream::*;
pub use self::forward::forward_streams;

use tokio::io::{AsyncRead, AsyncWrite};

pub type ErasedRead = Box<dyn AsyncRead + Send + Unpin>;
pub type ErasedWrite = Box<dyn AsyncWrite + Send + Unpin>;

pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T> AsyncReadWrite for T where T: AsyncRead + AsyncWrite {}

pub type ErasedReadWrite = Box<dyn AsyncReadWrite + Send + Unpin>;
