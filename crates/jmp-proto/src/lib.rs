//! Generated gRPC types and the JSON stream-metadata protocol layered on top of them.

#![allow(clippy::doc_markdown)]

pub mod proto {
    tonic::include_proto!("jumpstarter.v1");
}

pub use proto::*;

mod bridge;
mod stream_metadata;

pub use self::bridge::{byte_stream_from_frames, frame_stream_from_channel};
pub use self::stream_metadata::{
    decode_resource_stream_response, decode_stream_request, encode_resource_stream_response, encode_stream_request,
    ContentEncoding, ResourceStreamResponse, StreamMetadataError, StreamRequest, RESOURCE_STREAM_RESPONSE_METADATA_KEY,
    ROUTER_TOKEN_METADATA_KEY, STREAM_REQUEST_METADATA_KEY,
};
