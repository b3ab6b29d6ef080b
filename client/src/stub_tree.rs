//! The client stub tree (spec §4.5 step 4, REDESIGN FLAGS): rather than importing a
//! fully-qualified Python class by name, each [`DriverInstanceReport`] is matched against the
//! `allow`/`unsafe` policy and materializes as a generic [`ClientStub`] that forwards calls
//! verbatim over `DriverCall`/`StreamingDriverCall`. A class outside the policy still gets a
//! stub — it just refuses to execute any method.

use std::collections::HashMap;
use std::pin::Pin;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use futures::Stream;
use futures::StreamExt as _;
use jmp_driver::ResourceHandle;
use jmp_proto::proto::exporter_service_client::ExporterServiceClient;
use jmp_proto::proto::{DriverCallRequest, DriverInstanceReport, Empty, ExporterStatus, StreamingDriverCallRequest};
use jmp_proto::{Frame, StreamRequest, STREAM_REQUEST_METADATA_KEY};
use jmp_value::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Code, Request};
use uuid::Uuid;

use crate::config::DriversConf;

const CLIENT_LABEL: &str = "jumpstarter.dev/client";
const NAME_LABEL: &str = "jumpstarter.dev/name";

/// Terminal, client-visible failures a call precondition check can hit, matching
/// `AcquisitionError`'s shape so a caller can match on why a call was refused instead of parsing
/// a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StubError {
    #[error("stub class `{0}` is not in the configured allow list (exporter/client driver version mismatch?)")]
    NotAllowed(String),
    #[error("exporter is not ready for driver calls")]
    ExporterNotReady,
}

#[derive(Clone)]
struct Runtime {
    exporter: ExporterServiceClient<Channel>,
}

pub struct ClientStub {
    pub uuid: String,
    pub name: String,
    pub class: String,
    pub labels: HashMap<String, String>,
    pub description: String,
    pub children: Vec<ClientStub>,
    allowed: bool,
    runtime: Runtime,
}

impl ClientStub {
    pub fn child(&self, name: &str) -> Option<&ClientStub> {
        self.children.iter().find(|child| child.name == name)
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.ensure_allowed()?;
        self.ensure_ready().await?;

        let mut exporter = self.runtime.exporter.clone();
        let request = DriverCallRequest {
            uuid: self.uuid.clone(),
            method: method.to_owned(),
            args: encode_args(&args)?,
        };
        let response = exporter.driver_call(request).await.context("DriverCall RPC failed")?.into_inner();
        decode_result(&response.result)
    }

    pub async fn call_streaming(&self, method: &str, args: Vec<Value>) -> Result<Pin<Box<dyn Stream<Item = Result<Value>> + Send>>> {
        self.ensure_allowed()?;
        self.ensure_ready().await?;

        let mut exporter = self.runtime.exporter.clone();
        let request = StreamingDriverCallRequest {
            uuid: self.uuid.clone(),
            method: method.to_owned(),
            args: encode_args(&args)?,
        };
        let stream = exporter
            .streaming_driver_call(request)
            .await
            .context("StreamingDriverCall RPC failed")?
            .into_inner();

        let mapped = stream.map(|item| match item {
            Ok(response) => decode_result(&response.result),
            Err(status) => Err(anyhow::anyhow!("StreamingDriverCall stream broke: {status}")),
        });

        Ok(Box::pin(mapped))
    }

    /// Resource transfer (spec §4.4): opens a `kind=resource` `Stream` call, pushes `bytes` onto
    /// it, and returns the resulting handle as the `Value` a subsequent driver call's argument
    /// can carry. The exporter mints the resource's UUID and returns it via initial response
    /// metadata; this stub only needs to relay it back out as a [`ResourceHandle`].
    pub async fn open_resource_upload(&self, mut bytes: impl Stream<Item = Bytes> + Unpin + Send + 'static) -> Result<Value> {
        let mut exporter = self.runtime.exporter.clone();

        let (tx, rx) = mpsc::channel::<Frame>(64);
        let mut request = Request::new(ReceiverStream::new(rx));
        let stream_request_metadata =
            jmp_proto::encode_stream_request(&StreamRequest::Resource { x_jmp_content_encoding: None }).context("failed to encode stream request")?;
        request.metadata_mut().insert(STREAM_REQUEST_METADATA_KEY, stream_request_metadata);

        let response = exporter.stream(request).await.context("Stream RPC failed")?;
        let resource_response =
            jmp_proto::decode_resource_stream_response(response.metadata()).context("exporter did not return a resource stream response")?;
        let mut inbound = response.into_inner();

        tokio::spawn(async move {
            while let Some(chunk) = bytes.next().await {
                if tx.send(Frame { payload: chunk.to_vec(), close_write: false }).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Frame { payload: Vec::new(), close_write: true }).await;
            while matches!(inbound.message().await, Ok(Some(_))) {}
        });

        let uuid = Uuid::parse_str(&resource_response.uuid).context("malformed resource uuid")?;
        Ok(ResourceHandle::ClientStream { uuid, content_encoding: None }.to_value())
    }

    fn ensure_allowed(&self) -> Result<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(StubError::NotAllowed(self.class.clone()).into())
        }
    }

    /// Spec §4.5: `GetStatus` before every unary/streaming call; controllers predating
    /// `GetStatus` return `Unimplemented`, treated as ready for backward compatibility.
    async fn ensure_ready(&self) -> Result<()> {
        let mut exporter = self.runtime.exporter.clone();
        match exporter.get_status(Empty {}).await {
            Ok(response) => {
                if response.into_inner().status == ExporterStatus::LeaseReady as i32 {
                    Ok(())
                } else {
                    Err(StubError::ExporterNotReady.into())
                }
            }
            Err(status) if status.code() == Code::Unimplemented => Ok(()),
            Err(status) => Err(status).context("GetStatus RPC failed"),
        }
    }
}

fn encode_args(args: &[Value]) -> Result<Vec<String>> {
    args.iter().map(|value| serde_json::to_string(value).context("failed to encode argument")).collect()
}

fn decode_result(result: &str) -> Result<Value> {
    serde_json::from_str(result).context("failed to decode driver call result")
}

pub fn build(root_uuid: &str, reports: &[DriverInstanceReport], exporter: ExporterServiceClient<Channel>, drivers: &DriversConf) -> Result<ClientStub> {
    let by_uuid: HashMap<&str, &DriverInstanceReport> = reports.iter().map(|report| (report.uuid.as_str(), report)).collect();

    let mut children_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for report in reports {
        if !report.parent_uuid.is_empty() {
            children_of.entry(report.parent_uuid.as_str()).or_default().push(report.uuid.as_str());
        }
    }

    let runtime = Runtime { exporter };
    build_node(root_uuid, &by_uuid, &children_of, &runtime, drivers)
}

fn build_node(
    uuid: &str,
    by_uuid: &HashMap<&str, &DriverInstanceReport>,
    children_of: &HashMap<&str, Vec<&str>>,
    runtime: &Runtime,
    drivers: &DriversConf,
) -> Result<ClientStub> {
    let report = *by_uuid.get(uuid).with_context(|| format!("no report for driver uuid {uuid}"))?;

    let class = report.labels.get(CLIENT_LABEL).cloned().unwrap_or_else(|| "unknown".to_owned());
    let name = report.labels.get(NAME_LABEL).cloned().unwrap_or_default();
    let allowed = drivers.permits(&class);

    let children = children_of
        .get(uuid)
        .into_iter()
        .flatten()
        .map(|child_uuid| build_node(child_uuid, by_uuid, children_of, runtime, drivers))
        .collect::<Result<Vec<_>>>()?;

    Ok(ClientStub {
        uuid: uuid.to_owned(),
        name,
        class,
        labels: report.labels.clone(),
        description: report.description.clone(),
        children,
        allowed,
        runtime: runtime.clone(),
    })
}

#[cfg(test)]
mod tests {
    use tonic::transport::Endpoint;

    use super::*;

    fn dummy_exporter() -> ExporterServiceClient<Channel> {
        let channel = Endpoint::from_static("http://localhost:1").connect_lazy();
        ExporterServiceClient::new(channel)
    }

    fn report(uuid: &str, parent_uuid: &str, class: &str, name: &str) -> DriverInstanceReport {
        let mut labels = HashMap::new();
        labels.insert(CLIENT_LABEL.to_owned(), class.to_owned());
        if !name.is_empty() {
            labels.insert(NAME_LABEL.to_owned(), name.to_owned());
        }
        DriverInstanceReport {
            uuid: uuid.to_owned(),
            parent_uuid: parent_uuid.to_owned(),
            labels,
            description: String::new(),
            methods_description: HashMap::new(),
        }
    }

    #[test]
    fn children_attach_under_their_parent() {
        let reports = vec![
            report("root", "", "jumpstarter.drivers.composite.CompositeClient", ""),
            report("child", "root", "jumpstarter.drivers.power.MockPowerClient", "power"),
        ];
        let drivers = DriversConf {
            allow: vec!["jumpstarter".to_owned()],
            unsafe_allow_all: false,
        };

        let root = build("root", &reports, dummy_exporter(), &drivers).unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.child("power").unwrap().class, "jumpstarter.drivers.power.MockPowerClient");
    }

    #[test]
    fn disallowed_class_still_materializes_but_is_blocked() {
        let reports = vec![report("root", "", "evil.Backdoor", "")];
        let drivers = DriversConf {
            allow: vec!["jumpstarter".to_owned()],
            unsafe_allow_all: false,
        };

        let root = build("root", &reports, dummy_exporter(), &drivers).unwrap();
        assert!(!root.allowed);
        assert_eq!(root.class, "evil.Backdoor");
    }

    #[test]
    fn stub_error_messages_are_matchable_and_readable() {
        assert_eq!(StubError::ExporterNotReady.to_string(), "exporter is not ready for driver calls");
        assert_eq!(
            StubError::NotAllowed("evil.Backdoor".to_owned()).to_string(),
            "stub class `evil.Backdoor` is not in the configured allow list (exporter/client driver version mismatch?)"
        );
    }

    #[test]
    fn unsafe_allows_every_class() {
        let reports = vec![report("root", "", "anything.At.All", "")];
        let drivers = DriversConf {
            allow: Vec::new(),
            unsafe_allow_all: true,
        };

        let root = build("root", &reports, dummy_exporter(), &drivers).unwrap();
        assert!(root.allowed);
    }
}
