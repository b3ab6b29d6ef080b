//! The status loop (spec §4.3 step 2): subscribes to the controller's server-streaming `Status`,
//! keeps [`LeaseContext`] in sync, and notifies [`LeaseChange`]s to whoever owns the listen loop
//! and hook runner. Restarts the subscription with exponential backoff when the stream breaks;
//! gives up after a capped number of retries and fails upward.

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use jmp_proto::proto::controller_service_client::ControllerServiceClient;
use jmp_proto::proto::{StatusRequest, StatusResponse};
use jmp_task::{ShutdownSignal, Task};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tonic::transport::Channel;
use tonic::Streaming;
use tracing::warn;

use crate::lease::LeaseContext;

const INITIAL_BACKOFF: Duration = Duration::from_secs(3);
const MAX_RESTART_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct LeaseChange {
    pub lease_name: String,
    pub client_name: String,
}

pub struct StatusLoopTask {
    controller: ControllerServiceClient<Channel>,
    token: String,
    lease: std::sync::Arc<LeaseContext>,
    changes: mpsc::Sender<LeaseChange>,
}

impl StatusLoopTask {
    pub fn new(
        controller: ControllerServiceClient<Channel>,
        token: String,
        lease: std::sync::Arc<LeaseContext>,
        changes: mpsc::Sender<LeaseChange>,
    ) -> Self {
        Self {
            controller,
            token,
            lease,
            changes,
        }
    }

    async fn subscribe(&mut self) -> Result<Streaming<StatusResponse>> {
        let request = crate::controller_client::authorized_request(&self.token, StatusRequest {});
        let response = self.controller.status(request).await.context("Status RPC failed")?;
        Ok(response.into_inner())
    }

    async fn drain(&mut self, mut stream: Streaming<StatusResponse>) -> Result<()> {
        let mut last_lease_name = self.lease.lease_name();

        while let Some(update) = stream.message().await.context("Status stream broken")? {
            self.apply(update, &mut last_lease_name).await?;
        }

        bail!("Status stream ended")
    }

    /// Emits a [`LeaseChange`] whenever `lease_name` transitions, including to empty (lease
    /// released) — the lifecycle task treats an empty `lease_name` as the release signal.
    async fn apply(&mut self, update: StatusResponse, last_lease_name: &mut String) -> Result<()> {
        let current_lease_name = if update.leased { update.lease_name.clone() } else { String::new() };

        if update.leased {
            self.lease.set_lease(update.lease_name.clone(), update.client_name.clone());
        } else {
            self.lease.clear_lease();
        }

        if current_lease_name != *last_lease_name {
            *last_lease_name = current_lease_name.clone();
            let _ = self
                .changes
                .send(LeaseChange {
                    lease_name: current_lease_name,
                    client_name: update.client_name,
                })
                .await;
        }

        Ok(())
    }
}

#[async_trait]
impl Task for StatusLoopTask {
    type Output = Result<()>;

    const NAME: &'static str = "status loop";

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
                        warn!(%error, "status stream broke, restarting");
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to subscribe to Status");
                }
            }

            attempts += 1;
            if attempts > MAX_RESTART_ATTEMPTS {
                bail!("Status loop exhausted {MAX_RESTART_ATTEMPTS} restart attempts");
            }

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown_signal.wait() => return Ok(()),
            }
            backoff = (backoff * 2).min(Duration::from_secs(60));
        }
    }
}
