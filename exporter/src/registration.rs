//! One-shot registration (spec §4.3 step 1): build the session, fetch its own report over the
//! local socket, and register with the controller. Done once at startup, independent of leasing.
//! The symmetric teardown call is [`unregister`] (spec §5).

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context as _, Result};
use jmp_proto::proto::controller_service_client::ControllerServiceClient;
use jmp_proto::proto::{RegisterRequest, UnregisterRequest};
use tokio::time::timeout;
use tonic::transport::Channel;
use tracing::{info, warn};

use crate::session::Session;

const UNREGISTER_SHIELD: Duration = Duration::from_secs(10);

pub async fn register(
    controller: &mut ControllerServiceClient<Channel>,
    token: &str,
    labels: HashMap<String, String>,
    session: &Session,
) -> Result<String> {
    let reports = session.registry.reports();

    let request = crate::controller_client::authorized_request(token, RegisterRequest { labels, reports });

    let response = controller.register(request).await.context("Register RPC failed")?;

    Ok(response.into_inner().uuid)
}

/// Unregisters within a shielded window, best-effort: a controller that's already unreachable on
/// shutdown must not block process exit.
pub async fn unregister(controller: &mut ControllerServiceClient<Channel>, token: &str, reason: &str) {
    let request = crate::controller_client::authorized_request(token, UnregisterRequest { reason: reason.to_owned() });
    let call = controller.unregister(request);
    match timeout(UNREGISTER_SHIELD, call).await {
        Ok(Ok(_)) => info!("controller unregistration completed"),
        Ok(Err(error)) => warn!(%error, "Unregister RPC failed"),
        Err(_) => warn!("Unregister did not complete within the shielded window"),
    }
}
