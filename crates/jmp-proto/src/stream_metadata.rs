//! JSON-encoded metadata carried on `Stream` calls (both the exporter-service `Stream` and the
//! router-service `Stream`). This rides as gRPC initial metadata rather than a protobuf message
//! since it needs to be readable before the bidi call is accepted.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::metadata::{Ascii, MetadataMap, MetadataValue};

/// Name of the metadata entry carrying the JSON-encoded [`StreamRequest`].
pub const STREAM_REQUEST_METADATA_KEY: &str = "x-jmp-request";

/// Name of the initial response metadata entry carrying the JSON-encoded [`ResourceStreamResponse`].
pub const RESOURCE_STREAM_RESPONSE_METADATA_KEY: &str = "x-jmp-response";

/// Name of the metadata entry a router peer carries the pairing bearer token under.
pub const ROUTER_TOKEN_METADATA_KEY: &str = "authorization";

#[derive(Debug, Error)]
pub enum StreamMetadataError {
    #[error("missing metadata entry")]
    Missing,
    #[error("metadata entry is not valid UTF-8")]
    NotUtf8,
    #[error("metadata entry is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),
    #[error("failed to encode metadata value")]
    InvalidMetadataValue(#[source] tonic::metadata::errors::InvalidMetadataValue),
}

/// The discriminated union carried in `StreamRequest` metadata; `kind` selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamRequest {
    /// Open the named byte-stream operation on driver `uuid`.
    Driver { uuid: String, method: String },
    /// Register a new resource; the server mints the resource UUID itself and returns it via
    /// [`ResourceStreamResponse`] initial response metadata.
    Resource {
        #[serde(skip_serializing_if = "Option::is_none")]
        x_jmp_content_encoding: Option<ContentEncoding>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Gzip,
    Xz,
    Bzip2,
}

/// Initial response metadata for a `kind=resource` `Stream` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStreamResponse {
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_jmp_accept_encoding: Option<ContentEncoding>,
}

pub fn encode_stream_request(request: &StreamRequest) -> Result<MetadataValue<Ascii>, StreamMetadataError> {
    let json = serde_json::to_string(request).expect("StreamRequest always serializes");
    json.parse().map_err(StreamMetadataError::InvalidMetadataValue)
}

pub fn decode_stream_request(metadata: &MetadataMap) -> Result<StreamRequest, StreamMetadataError> {
    let value = metadata.get(STREAM_REQUEST_METADATA_KEY).ok_or(StreamMetadataError::Missing)?;
    let text = value.to_str().map_err(|_| StreamMetadataError::NotUtf8)?;
    serde_json::from_str(text).map_err(StreamMetadataError::InvalidJson)
}

pub fn encode_resource_stream_response(response: &ResourceStreamResponse) -> Result<MetadataValue<Ascii>, StreamMetadataError> {
    let json = serde_json::to_string(response).expect("ResourceStreamResponse always serializes");
    json.parse().map_err(StreamMetadataError::InvalidMetadataValue)
}

pub fn decode_resource_stream_response(metadata: &MetadataMap) -> Result<ResourceStreamResponse, StreamMetadataError> {
    let value = metadata
        .get(RESOURCE_STREAM_RESPONSE_METADATA_KEY)
        .ok_or(StreamMetadataError::Missing)?;
    let text = value.to_str().map_err(|_| StreamMetadataError::NotUtf8)?;
    serde_json::from_str(text).map_err(StreamMetadataError::InvalidJson)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_driver_request() {
        let request = StreamRequest::Driver {
            uuid: "11111111-1111-1111-1111-111111111111".to_owned(),
            method: "connect".to_owned(),
        };
        let mut metadata = MetadataMap::new();
        metadata.insert(STREAM_REQUEST_METADATA_KEY, encode_stream_request(&request).unwrap());
        assert_eq!(decode_stream_request(&metadata).unwrap(), request);
    }

    #[test]
    fn resource_request_omits_absent_encoding() {
        let request = StreamRequest::Resource {
            x_jmp_content_encoding: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"kind":"resource"}"#);
    }
}
