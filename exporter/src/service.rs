//! The `ExporterService` gRPC server, served locally over a Unix socket and relayed to whichever
//! client currently holds the lease.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt as _;
use jmp_driver::{dispatch_call, dispatch_open_stream, dispatch_streaming_call};
use jmp_proto::proto::exporter_service_server::ExporterService as ExporterServiceTrait;
use jmp_proto::proto::{
    DriverCallRequest, DriverCallResponse, Empty, GetReportResponse, GetStatusResponse, LogStreamResponse,
    StreamingDriverCallRequest, StreamingDriverCallResponse,
};
use jmp_proto::{Frame, StreamRequest};
use jmp_transport::{byte_stream_from_frames, forward_streams, frame_stream_from_channel};
use jmp_value::Value;
use tokio::sync::RwLock;
use tokio_stream::wrappers::BroadcastStream;
use tonic::{Request, Response, Status, Streaming};
use uuid::Uuid;

use crate::session::{ExporterState, Session};

pub struct ExporterServiceImpl {
    state: Arc<ExporterState>,
    session: Arc<RwLock<Option<Session>>>,
}

impl ExporterServiceImpl {
    pub fn new(state: Arc<ExporterState>, session: Arc<RwLock<Option<Session>>>) -> Self {
        Self { state, session }
    }

    fn no_session() -> Status {
        Status::unavailable("no session is currently active for this exporter")
    }
}

fn decode_args(args: &[String]) -> Result<Vec<Value>, Status> {
    args.iter()
        .map(|arg| serde_json::from_str(arg).map_err(|error| Status::invalid_argument(format!("bad argument value: {error}"))))
        .collect()
}

fn encode_result(value: &Value) -> String {
    serde_json::to_string(value).expect("Value always serializes")
}

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

#[tonic::async_trait]
impl ExporterServiceTrait for ExporterServiceImpl {
    async fn get_report(&self, _request: Request<Empty>) -> Result<Response<GetReportResponse>, Status> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or_else(Self::no_session)?;

        Ok(Response::new(GetReportResponse {
            uuid: session.registry.root_uuid().to_string(),
            labels: Default::default(),
            reports: session.registry.reports(),
        }))
    }

    async fn driver_call(&self, request: Request<DriverCallRequest>) -> Result<Response<DriverCallResponse>, Status> {
        let request = request.into_inner();
        let uuid = Uuid::parse_str(&request.uuid).map_err(|_| Status::invalid_argument("malformed driver uuid"))?;
        let args = decode_args(&request.args)?;

        let session = self.session.read().await;
        let session = session.as_ref().ok_or_else(Self::no_session)?;
        let driver = session.registry.get(uuid).ok_or_else(|| Status::not_found("unknown driver uuid"))?;

        let result = dispatch_call(driver, &request.method, args).await?;

        Ok(Response::new(DriverCallResponse {
            uuid: request.uuid,
            result: encode_result(&result),
        }))
    }

    type StreamingDriverCallStream = ResponseStream<StreamingDriverCallResponse>;

    async fn streaming_driver_call(
        &self,
        request: Request<StreamingDriverCallRequest>,
    ) -> Result<Response<Self::StreamingDriverCallStream>, Status> {
        let request = request.into_inner();
        let uuid = Uuid::parse_str(&request.uuid).map_err(|_| Status::invalid_argument("malformed driver uuid"))?;
        let args = decode_args(&request.args)?;

        let session = self.session.read().await;
        let session = session.as_ref().ok_or_else(Self::no_session)?;
        let driver = session.registry.get(uuid).ok_or_else(|| Status::not_found("unknown driver uuid"))?;

        let items = dispatch_streaming_call(driver, &request.method, args).await?;
        let reply_uuid = request.uuid;
        let stream = items.map(move |item| {
            item.map(|value| StreamingDriverCallResponse {
                uuid: reply_uuid.clone(),
                result: encode_result(&value),
            })
            .map_err(Status::from)
        });

        Ok(Response::new(Box::pin(stream)))
    }

    type StreamStream = ResponseStream<Frame>;

    async fn stream(&self, request: Request<Streaming<Frame>>) -> Result<Response<Self::StreamStream>, Status> {
        let metadata = request.metadata().clone();
        let stream_request = jmp_proto::decode_stream_request(&metadata).map_err(|error| Status::invalid_argument(error.to_string()))?;
        let frames = request.into_inner();
        let (peer, rx) = byte_stream_from_frames(frames);

        match stream_request {
            StreamRequest::Driver { uuid, method } => {
                let uuid = Uuid::parse_str(&uuid).map_err(|_| Status::invalid_argument("malformed driver uuid"))?;
                let session = self.session.read().await;
                let session = session.as_ref().ok_or_else(Self::no_session)?;
                let driver = session.registry.get(uuid).ok_or_else(|| Status::not_found("unknown driver uuid"))?;
                let target = dispatch_open_stream(driver, &method).await?;

                tokio::spawn(async move {
                    let _ = forward_streams(peer, target).await;
                });

                Ok(Response::new(Box::pin(frame_stream_from_channel(rx)) as Self::StreamStream))
            }
            StreamRequest::Resource { .. } => {
                let session = self.session.read().await;
                let session = session.as_ref().ok_or_else(Self::no_session)?;
                let uuid = session.resources.insert(peer);

                let response_metadata = jmp_proto::encode_resource_stream_response(&jmp_proto::ResourceStreamResponse {
                    uuid: uuid.to_string(),
                    x_jmp_accept_encoding: None,
                })
                .map_err(|error| Status::internal(error.to_string()))?;

                let mut response = Response::new(Box::pin(frame_stream_from_channel(rx)) as Self::StreamStream);
                response.metadata_mut().insert(jmp_proto::RESOURCE_STREAM_RESPONSE_METADATA_KEY, response_metadata);
                Ok(response)
            }
        }
    }

    type LogStreamStream = ResponseStream<LogStreamResponse>;

    async fn log_stream(&self, _request: Request<Empty>) -> Result<Response<Self::LogStreamStream>, Status> {
        let stream = BroadcastStream::new(self.state.log_sink.subscribe()).filter_map(|item| async move { item.ok().map(Ok) });
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_status(&self, _request: Request<Empty>) -> Result<Response<GetStatusResponse>, Status> {
        let (status, status_message) = self.state.lease.phase().to_wire();
        Ok(Response::new(GetStatusResponse {
            status: status as i32,
            status_message,
        }))
    }
}
