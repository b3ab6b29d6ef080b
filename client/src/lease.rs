//! Lease acquisition (spec §4.5): create-or-reuse, poll to a terminal condition, and a shielded
//! delete on release.

use std::time::Duration;

use anyhow::{Context as _, Result};
use jmp_proto::proto::controller_service_client::ControllerServiceClient;
use jmp_proto::proto::condition_status::Status as ConditionStatusValue;
use jmp_proto::proto::{CreateLeaseRequest, DeleteLeaseRequest, GetLeaseRequest, GetLeaseResponse};
use rand::Rng as _;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tonic::transport::Channel;
use tracing::warn;

/// Terminal, client-visible outcomes of waiting for a lease to become ready (spec §4.5). Kept
/// distinct from the transient transport errors `get_lease_with_retry` already retries past, so
/// a caller can match on why acquisition gave up rather than parse an error string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("lease unsatisfiable: {0}")]
    Unsatisfiable(String),
    #[error("lease invalid: {0}")]
    Invalid(String),
    #[error("lease released")]
    Released,
    #[error("protocol violation: lease is neither pending nor terminal")]
    ProtocolViolation,
}

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_TICK: Duration = Duration::from_secs(1);
const INITIAL_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(120);
const DELETE_LEASE_SHIELD: Duration = Duration::from_secs(30);

const CONDITION_READY: &str = "Ready";
const CONDITION_UNSATISFIABLE: &str = "Unsatisfiable";
const CONDITION_INVALID: &str = "Invalid";
const CONDITION_PENDING: &str = "Pending";

pub struct Lease {
    pub name: String,
    pub exporter: String,
}

pub struct AcquireLeaseRequest<'a> {
    pub selector: &'a str,
    pub duration_seconds: u64,
    pub name: Option<&'a str>,
    pub acquisition_timeout: Duration,
}

/// Tracks the bearer token presented to the Controller and the one-shot in-band re-auth fallback
/// (spec §1's "in-band re-auth retry"): the proto carries no token-refresh RPC, so a single
/// `Unauthenticated` response swaps to `refresh_token` and retries once.
pub struct AuthTokens {
    current: String,
    refresh: Option<String>,
}

impl AuthTokens {
    pub fn new(token: String, refresh_token: Option<String>) -> Self {
        Self { current: token, refresh: refresh_token }
    }

    fn rotate_to_refresh(&mut self) -> bool {
        match self.refresh.take() {
            Some(refresh) => {
                self.current = refresh;
                true
            }
            None => false,
        }
    }
}

pub async fn acquire_lease(controller: &mut ControllerServiceClient<Channel>, tokens: &mut AuthTokens, request: AcquireLeaseRequest<'_>) -> Result<Lease> {
    timeout(request.acquisition_timeout, acquire_lease_inner(controller, tokens, request))
        .await
        .context("lease acquisition timed out")?
}

async fn acquire_lease_inner(controller: &mut ControllerServiceClient<Channel>, tokens: &mut AuthTokens, request: AcquireLeaseRequest<'_>) -> Result<Lease> {
    let name = match request.name {
        Some(name) => {
            match get_lease_with_retry(controller, tokens, name).await {
                Ok(existing) if existing.selector == request.selector => name.to_owned(),
                Ok(existing) => {
                    warn!(requested = request.selector, existing = existing.selector, "named lease selector mismatch, creating a new lease");
                    create_lease(controller, tokens, &request).await?
                }
                Err(_) => create_lease(controller, tokens, &request).await?,
            }
        }
        None => create_lease(controller, tokens, &request).await?,
    };

    poll_until_ready(controller, tokens, &name).await?;
    let final_state = get_lease_with_retry(controller, tokens, &name).await?;

    Ok(Lease {
        name,
        exporter: final_state.exporter.unwrap_or_default(),
    })
}

async fn create_lease(controller: &mut ControllerServiceClient<Channel>, tokens: &mut AuthTokens, request: &AcquireLeaseRequest<'_>) -> Result<String> {
    let message = CreateLeaseRequest {
        selector: request.selector.to_owned(),
        duration_seconds: request.duration_seconds,
        name: request.name.map(str::to_owned),
    };

    let wire_request = crate::controller_client::authorized_request(&tokens.current, message.clone());
    match controller.create_lease(wire_request).await {
        Ok(response) => Ok(response.into_inner().name),
        Err(status) if status.code() == tonic::Code::Unauthenticated && tokens.rotate_to_refresh() => {
            warn!("CreateLease unauthenticated, retrying with the refresh token");
            let retry_request = crate::controller_client::authorized_request(&tokens.current, message);
            let response = controller.create_lease(retry_request).await.context("CreateLease RPC failed after re-auth")?;
            Ok(response.into_inner().name)
        }
        Err(status) => Err(status).context("CreateLease RPC failed"),
    }
}

async fn poll_until_ready(controller: &mut ControllerServiceClient<Channel>, tokens: &mut AuthTokens, name: &str) -> Result<()> {
    loop {
        let state = get_lease_with_retry(controller, tokens, name).await?;

        if condition_is(&state, CONDITION_READY, ConditionStatusValue::True) {
            return Ok(());
        }
        if let Some(message) = condition_message_if(&state, CONDITION_UNSATISFIABLE, ConditionStatusValue::True) {
            return Err(AcquisitionError::Unsatisfiable(message).into());
        }
        if let Some(message) = condition_message_if(&state, CONDITION_INVALID, ConditionStatusValue::True) {
            return Err(AcquisitionError::Invalid(message).into());
        }
        if condition_is(&state, CONDITION_READY, ConditionStatusValue::False) {
            return Err(AcquisitionError::Released.into());
        }
        if condition_is(&state, CONDITION_PENDING, ConditionStatusValue::False)
            && !has_any_terminal_condition(&state)
        {
            return Err(AcquisitionError::ProtocolViolation.into());
        }

        tick_progress().await;
    }
}

fn has_any_terminal_condition(state: &GetLeaseResponse) -> bool {
    state.conditions.iter().any(|condition| {
        matches!(condition.r#type.as_str(), CONDITION_READY | CONDITION_UNSATISFIABLE | CONDITION_INVALID)
            && condition.status == ConditionStatusValue::True as i32
    })
}

fn condition_is(state: &GetLeaseResponse, kind: &str, status: ConditionStatusValue) -> bool {
    state.conditions.iter().any(|condition| condition.r#type == kind && condition.status == status as i32)
}

fn condition_message_if(state: &GetLeaseResponse, kind: &str, status: ConditionStatusValue) -> Option<String> {
    state
        .conditions
        .iter()
        .find(|condition| condition.r#type == kind && condition.status == status as i32)
        .map(|condition| condition.message.clone())
}

async fn tick_progress() {
    for _ in 0..(POLL_INTERVAL.as_secs() / POLL_TICK.as_secs()) {
        sleep(POLL_TICK).await;
    }
}

/// Retries transport errors with exponential jitter backoff, indefinitely — a transient
/// controller outage must not cancel an acquisition already in progress; `acquisition_timeout`
/// bounds the outer call instead.
async fn get_lease_with_retry(controller: &mut ControllerServiceClient<Channel>, tokens: &mut AuthTokens, name: &str) -> Result<GetLeaseResponse> {
    let mut backoff = INITIAL_RETRY_BACKOFF;
    loop {
        let request = crate::controller_client::authorized_request(&tokens.current, GetLeaseRequest { name: name.to_owned() });
        match controller.get_lease(request).await {
            Ok(response) => return Ok(response.into_inner()),
            Err(status) if status.code() == tonic::Code::Unauthenticated && tokens.rotate_to_refresh() => {
                warn!("GetLease unauthenticated, retrying with the refresh token");
            }
            Err(status) => {
                warn!(%status, "GetLease failed, retrying");
                let jitter = rand::thread_rng().gen_range(0.0..1.0_f64);
                sleep(backoff.mul_f64(1.0 + jitter)).await;
                backoff = (backoff * 2).min(MAX_RETRY_BACKOFF);
            }
        }
    }
}

/// Deletes a lease within a shielded window, best-effort. Rust has no async `Drop`, so unlike a
/// scope-exit guard this must be called explicitly by the owner of the lease at the end of its
/// scope.
pub async fn release_lease(controller: &mut ControllerServiceClient<Channel>, tokens: &AuthTokens, name: &str) {
    let request = crate::controller_client::authorized_request(&tokens.current, DeleteLeaseRequest { name: name.to_owned() });
    let delete = controller.delete_lease(request);
    if timeout(DELETE_LEASE_SHIELD, delete).await.is_err() {
        warn!(lease = name, "DeleteLease did not complete within the shielded window");
    }
}

#[cfg(test)]
mod tests {
    use jmp_proto::proto::Condition;

    use super::*;

    fn response_with(conditions: Vec<(&str, ConditionStatusValue, &str)>) -> GetLeaseResponse {
        GetLeaseResponse {
            name: "lease-1".to_owned(),
            selector: "board=x".to_owned(),
            duration_seconds: 60,
            effective_begin_time: None,
            effective_end_time: None,
            exporter: Some("exporter-1".to_owned()),
            conditions: conditions
                .into_iter()
                .map(|(r#type, status, message)| Condition {
                    r#type: r#type.to_owned(),
                    status: status as i32,
                    reason: String::new(),
                    message: message.to_owned(),
                })
                .collect(),
        }
    }

    #[test]
    fn ready_true_is_detected() {
        let state = response_with(vec![(CONDITION_READY, ConditionStatusValue::True, "")]);
        assert!(condition_is(&state, CONDITION_READY, ConditionStatusValue::True));
    }

    #[test]
    fn unsatisfiable_condition_carries_its_message() {
        let state = response_with(vec![(CONDITION_UNSATISFIABLE, ConditionStatusValue::True, "no matching exporter")]);
        assert_eq!(
            condition_message_if(&state, CONDITION_UNSATISFIABLE, ConditionStatusValue::True).as_deref(),
            Some("no matching exporter")
        );
    }

    #[test]
    fn pending_with_no_terminal_condition_has_no_terminal() {
        let state = response_with(vec![(CONDITION_PENDING, ConditionStatusValue::False, "")]);
        assert!(!has_any_terminal_condition(&state));
    }

    #[test]
    fn acquisition_error_messages_carry_the_condition_text() {
        assert_eq!(
            AcquisitionError::Unsatisfiable("no matching exporter".to_owned()).to_string(),
            "lease unsatisfiable: no matching exporter"
        );
        assert_eq!(AcquisitionError::Released.to_string(), "lease released");
    }
}
