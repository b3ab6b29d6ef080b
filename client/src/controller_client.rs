//! Builds the gRPC channel to the external Controller service.
//!
//! Keepalive is read from env vars the way the rest of this codebase pulls runtime tuning out of
//! the environment rather than the config file, so an operator can adjust it without touching a
//! pushed config.

use std::time::Duration;

use anyhow::{Context as _, Result};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Request;

use crate::config::TlsConf;

const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 30;
const DEFAULT_KEEPALIVE_TOLERANCE_SECS: u64 = 10;

/// Wraps `message` with the bearer-token authorization header every Controller call carries.
pub fn authorized_request<T>(token: &str, message: T) -> Request<T> {
    let mut request = Request::new(message);
    if let Ok(value) = format!("Bearer {token}").parse() {
        request.metadata_mut().insert("authorization", value);
    }
    request
}

pub async fn connect(endpoint: &str, tls: &TlsConf) -> Result<Channel> {
    let mut builder = Endpoint::from_shared(endpoint.to_owned()).with_context(|| format!("invalid controller endpoint `{endpoint}`"))?;

    if !tls.insecure {
        let mut tls_config = ClientTlsConfig::new().with_native_roots();
        if let Some(ca) = &tls.ca {
            let pem = std::fs::read_to_string(ca).with_context(|| format!("couldn't read CA certificate at {ca}"))?;
            tls_config = tls_config.ca_certificate(tonic::transport::Certificate::from_pem(pem));
        }
        builder = builder.tls_config(tls_config)?;
    }

    let keepalive_interval = env_duration_secs("JMP_KEEPALIVE_INTERVAL", DEFAULT_KEEPALIVE_INTERVAL_SECS);
    let keepalive_tolerance = env_duration_secs("JMP_KEEPALIVE_TOLERANCE", DEFAULT_KEEPALIVE_TOLERANCE_SECS);

    let channel = builder
        .http2_keep_alive_interval(keepalive_interval)
        .keep_alive_timeout(keepalive_tolerance)
        .keep_alive_while_idle(true)
        .connect()
        .await
        .with_context(|| format!("couldn't connect to controller at {endpoint}"))?;

    Ok(channel)
}

fn env_duration_secs(name: &str, default_secs: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default_secs))
}
