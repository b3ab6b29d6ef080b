//! The listen loop (spec §4.3 step 3, §4.4): for the current lease only, subscribes to the
//! controller's `Listen` stream and, for each `{router_endpoint, router_token}` invitation,
//! dials the external router as a plain `RouterService` *client* and pairs that connection with
//! the session's local Unix socket.
//!
//! The exporter never serves `RouterService` itself — both here and at the client, this crate
//! only ever dials out to the router the same way any other peer does.

use std::io;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8PathBuf;
use jmp_proto::proto::controller_service_client::ControllerServiceClient;
use jmp_proto::proto::router_service_client::RouterServiceClient;
use jmp_proto::proto::ListenRequest;
use jmp_proto::Frame;
use jmp_task::{ShutdownSignal, Task};
use jmp_transport::{forward_streams, ByteStream, IoByteStream};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::Streaming;
use tracing::warn;

use crate::config::TlsConf;

const INITIAL_BACKOFF: Duration = Duration::from_secs(3);
const MAX_RESTART_ATTEMPTS: u32 = 5;

pub struct ListenLoopTask {
    controller: ControllerServiceClient<Channel>,
    token: String,
    lease_name: String,
    session_socket: Utf8PathBuf,
    tls: TlsConf,
}

impl ListenLoopTask {
    pub fn new(controller: ControllerServiceClient<Channel>, token: String, lease_name: String, session_socket: Utf8PathBuf, tls: TlsConf) -> Self {
        Self {
            controller,
            token,
            lease_name,
            session_socket,
            tls,
        }
    }

    async fn subscribe(&mut self) -> Result<Streaming<jmp_proto::proto::ListenResponse>> {
        let request = crate::controller_client::authorized_request(
            &self.token,
            ListenRequest {
                lease_name: self.lease_name.clone(),
            },
        );
        let response = self.controller.listen(request).await.context("Listen RPC failed")?;
        Ok(response.into_inner())
    }

    async fn drain(&mut self, mut stream: Streaming<jmp_proto::proto::ListenResponse>) -> Result<()> {
        while let Some(invitation) = stream.message().await.context("Listen stream broke")? {
            let tls = self.tls.clone();
            let socket_path = self.session_socket.clone();
            tokio::spawn(async move {
                if let Err(error) = pair_with_router(&invitation.router_endpoint, &invitation.router_token, &socket_path, &tls).await {
                    warn!(%error, "router pairing failed");
                }
            });
        }

        bail!("Listen stream ended")
    }
}

#[async_trait]
impl Task for ListenLoopTask {
    type Output = Result<()>;

    const NAME: &'static str = "listen loop";

    /// A transient Listen-stream break must not stop the exporter from accepting new router
    /// invitations for the rest of the lease, so this restarts with the same backoff/retry budget
    /// `StatusLoopTask` uses rather than propagating the first error.
    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts = 0u32;

        loop {
            let stream = tokio::select! {
                result = self.subscribe() => result,
                _ = shutdown_signal.wait() => return Ok(()),
            };

            match stream {
                Ok(stream) => {
                    attempts = 0;
                    backoff = INITIAL_BACKOFF;

                    let outcome = tokio::select! {
                        result = self.drain(stream) => result,
                        _ = shutdown_signal.wait() => return Ok(()),
                    };

                    if let Err(error) = outcome {
                        warn!(%error, "listen stream broke, restarting");
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to subscribe to Listen");
                }
            }

            attempts += 1;
            if attempts > MAX_RESTART_ATTEMPTS {
                bail!("Listen loop exhausted {MAX_RESTART_ATTEMPTS} restart attempts");
            }

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown_signal.wait() => return Ok(()),
            }
            backoff = (backoff * 2).min(Duration::from_secs(60));
        }
    }
}

async fn pair_with_router(router_endpoint: &str, router_token: &str, session_socket: &camino::Utf8Path, tls: &TlsConf) -> Result<()> {
    let channel = crate::controller_client::connect(router_endpoint, tls).await?;
    let mut router = RouterServiceClient::new(channel);

    let (tx, rx) = mpsc::channel::<Frame>(64);
    let request_stream = ReceiverStream::new(rx);
    let request = crate::controller_client::authorized_request(router_token, request_stream);

    let response = router.stream(request).await.context("router Stream call failed")?;
    let inbound = response.into_inner();

    let peer: jmp_transport::BoxedByteStream = Box::new(RouterPeer {
        inbound,
        outbound: tx,
        eof_sent: false,
    });

    let unix_stream = UnixStream::connect(session_socket.as_std_path())
        .await
        .with_context(|| format!("couldn't connect to session socket at {session_socket}"))?;
    let local: jmp_transport::BoxedByteStream = Box::new(IoByteStream::new(unix_stream));

    forward_streams(peer, local).await?;
    Ok(())
}

/// Client-side adapter for a `RouterService::Stream` call: reads frames off the response stream,
/// writes frames onto the request stream's sender half. The mirror image of
/// `jmp_proto::byte_stream_from_frames`, which adapts the *server* side of the same RPC shape.
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
