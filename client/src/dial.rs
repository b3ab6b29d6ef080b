//! Connecting to a held lease (spec §4.5 "Connecting to a held lease"): a temporary Unix listener
//! accepts local connections, each of which triggers `Dial(lease_name)` and a router handshake
//! (mirrors the exporter's own `RouterService` client dial in spirit, but one-shot per connection
//! rather than subscribed to `Listen`), and a second Unix-socket channel multiplexes the unary
//! and streaming `ExporterService` calls the stub tree makes.

use std::io;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8PathBuf;
use hyper_util::rt::TokioIo;
use jmp_proto::proto::controller_service_client::ControllerServiceClient;
use jmp_proto::proto::router_service_client::RouterServiceClient;
use jmp_proto::proto::DialRequest;
use jmp_proto::Frame;
use jmp_task::{ShutdownSignal, Task};
use jmp_transport::{forward_streams, ByteStream, IoByteStream};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::Streaming;
use tower::service_fn;
use tracing::warn;
use uuid::Uuid;

use crate::config::TlsConf;

/// Binds a fresh Unix socket under the system temp dir; the client forwards every local
/// connection it accepts there out to the held lease's exporter.
pub fn bind_local_socket() -> Result<(UnixListener, Utf8PathBuf)> {
    let path = Utf8PathBuf::from(format!("/tmp/jmp-client-{}.sock", Uuid::new_v4()));
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).with_context(|| format!("couldn't bind local socket at {path}"))?;
    Ok((listener, path))
}

/// Opens a channel to the `ExporterService` multiplexed over a local Unix socket — used for
/// `GetReport` and every driver call the stub tree issues.
pub async fn connect_session(socket_path: Utf8PathBuf) -> Result<Channel> {
    Endpoint::try_from("http://jmp-session.invalid")
        .expect("static placeholder URI always parses")
        .connect_with_connector(service_fn(move |_: tonic::transport::Uri| {
            let path = socket_path.clone();
            async move {
                let stream = UnixStream::connect(path.as_std_path()).await?;
                Ok::<_, io::Error>(TokioIo::new(stream))
            }
        }))
        .await
        .context("couldn't connect to the session socket")
}

pub struct DialLoopTask {
    controller: ControllerServiceClient<Channel>,
    token: String,
    lease_name: String,
    listener: UnixListener,
    tls: TlsConf,
}

impl DialLoopTask {
    pub fn new(controller: ControllerServiceClient<Channel>, token: String, lease_name: String, listener: UnixListener, tls: TlsConf) -> Self {
        Self {
            controller,
            token,
            lease_name,
            listener,
            tls,
        }
    }
}

#[async_trait]
impl Task for DialLoopTask {
    type Output = Result<()>;

    const NAME: &'static str = "dial loop";

    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown_signal.wait() => return Ok(()),
            };

            let (local_stream, _addr) = match accepted {
                Ok(pair) => pair,
                Err(error) => {
                    warn!(%error, "failed to accept local connection");
                    continue;
                }
            };

            let mut controller = self.controller.clone();
            let token = self.token.clone();
            let lease_name = self.lease_name.clone();
            let tls = self.tls.clone();

            tokio::spawn(async move {
                if let Err(error) = dial_and_forward(&mut controller, &token, &lease_name, &tls, local_stream).await {
                    warn!(%error, "dial and forward failed");
                }
            });
        }
    }
}

async fn dial_and_forward(
    controller: &mut ControllerServiceClient<Channel>,
    token: &str,
    lease_name: &str,
    tls: &TlsConf,
    local_stream: UnixStream,
) -> Result<()> {
    let request = crate::controller_client::authorized_request(
        token,
        DialRequest {
            lease_name: lease_name.to_owned(),
        },
    );
    let invitation = controller.dial(request).await.context("Dial RPC failed")?.into_inner();

    let channel = crate::controller_client::connect(&invitation.router_endpoint, tls).await?;
    let mut router = RouterServiceClient::new(channel);

    let (tx, rx) = mpsc::channel::<Frame>(64);
    let request_stream = ReceiverStream::new(rx);
    let request = crate::controller_client::authorized_request(&invitation.router_token, request_stream);

    let response = router.stream(request).await.context("router Stream call failed")?;
    let inbound = response.into_inner();

    let peer: jmp_transport::BoxedByteStream = Box::new(RouterPeer {
        inbound,
        outbound: tx,
        eof_sent: false,
    });
    let local: jmp_transport::BoxedByteStream = Box::new(IoByteStream::new(local_stream));

    forward_streams(peer, local).await?;
    Ok(())
}

/// Client-side adapter for a `RouterService::Stream` call; the mirror image of
/// `jmp_proto::byte_stream_from_frames`, which adapts the *server* side of the same RPC shape.
/// Duplicated from the exporter's own `listen` module rather than shared, since the two crates
/// never depend on each other.
struct RouterPeer {
    inbound: Streaming<Frame>,
    outbound: mpsc::Sender<Frame>,
    eof_sent: bool,
}

#[async_trait]
impl ByteStream for RouterPeer {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.outbound
            .send(Frame {
                payload: data.to_vec(),
                close_write: false,
            })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "router stream closed"))
    }

    async fn receive(&mut self) -> io::Result<Option<Bytes>> {
        match self.inbound.message().await {
            Ok(Some(frame)) if frame.close_write => Ok(None),
            Ok(Some(frame)) => Ok(Some(Bytes::from(frame.payload))),
            Ok(None) => Ok(None),
            Err(status) => Err(io::Error::other(status.to_string())),
        }
    }

    async fn send_eof(&mut self) -> io::Result<()> {
        if !self.eof_sent {
            let _ = self
                .outbound
                .send(Frame {
                    payload: Vec::new(),
                    close_write: true,
                })
                .await;
            self.eof_sent = true;
        }
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.send_eof().await
    }
}
