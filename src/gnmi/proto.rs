//! Wire types for the gNMI Subscribe contract, written out by hand so the
//! build does not depend on protoc. Field numbers follow the published
//! gnmi.proto; only the subset this collector touches is modeled.

use std::collections::HashMap;

/// A path element with optional key predicates.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PathElem {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(map = "string, string", tag = "2")]
    pub key: HashMap<String, String>,
}

/// A structured path.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Path {
    /// Pre-PathElem path rendering, still emitted by older targets.
    #[prost(string, repeated, tag = "1")]
    pub element: Vec<String>,
    #[prost(string, tag = "2")]
    pub origin: String,
    #[prost(message, repeated, tag = "3")]
    pub elem: Vec<PathElem>,
    #[prost(string, tag = "4")]
    pub target: String,
}

/// Deprecated fixed-point decimal carried by some targets.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Decimal64 {
    #[prost(int64, tag = "1")]
    pub digits: i64,
    #[prost(uint32, tag = "2")]
    pub precision: u32,
}

/// The typed value union.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedValue {
    #[prost(oneof = "typed_value::Value", tags = "1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 14")]
    pub value: Option<typed_value::Value>,
}

pub mod typed_value {
    use super::Decimal64;

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(string, tag = "1")]
        StringVal(String),
        #[prost(int64, tag = "2")]
        IntVal(i64),
        #[prost(uint64, tag = "3")]
        UintVal(u64),
        #[prost(bool, tag = "4")]
        BoolVal(bool),
        #[prost(bytes = "vec", tag = "5")]
        BytesVal(Vec<u8>),
        #[prost(float, tag = "6")]
        FloatVal(f32),
        #[prost(message, tag = "7")]
        DecimalVal(Decimal64),
        #[prost(bytes = "vec", tag = "10")]
        JsonVal(Vec<u8>),
        #[prost(bytes = "vec", tag = "11")]
        JsonIetfVal(Vec<u8>),
        #[prost(string, tag = "12")]
        AsciiVal(String),
        #[prost(double, tag = "14")]
        DoubleVal(f64),
    }
}

/// One value update inside a notification.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Update {
    #[prost(message, optional, tag = "1")]
    pub path: Option<Path>,
    #[prost(message, optional, tag = "3")]
    pub val: Option<TypedValue>,
    #[prost(uint32, tag = "4")]
    pub duplicates: u32,
}

/// A timestamped batch of updates sharing a prefix.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notification {
    /// Unix nanoseconds.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "2")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "4")]
    pub update: Vec<Update>,
    #[prost(message, repeated, tag = "5")]
    pub delete: Vec<Path>,
    #[prost(bool, tag = "6")]
    pub atomic: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum Encoding {
    Json = 0,
    Bytes = 1,
    Proto = 2,
    Ascii = 3,
    JsonIetf = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum SubscriptionMode {
    TargetDefined = 0,
    OnChange = 1,
    Sample = 2,
}

/// One stream subscription inside a subscription list.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Subscription {
    #[prost(message, optional, tag = "1")]
    pub path: Option<Path>,
    #[prost(enumeration = "SubscriptionMode", tag = "2")]
    pub mode: i32,
    /// Nanoseconds between samples.
    #[prost(uint64, tag = "3")]
    pub sample_interval: u64,
    #[prost(bool, tag = "4")]
    pub suppress_redundant: bool,
    /// Nanoseconds between heartbeats when suppression is on.
    #[prost(uint64, tag = "5")]
    pub heartbeat_interval: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscriptionList {
    #[prost(message, optional, tag = "1")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "2")]
    pub subscription: Vec<Subscription>,
    #[prost(enumeration = "subscription_list::Mode", tag = "5")]
    pub mode: i32,
    #[prost(enumeration = "Encoding", tag = "8")]
    pub encoding: i32,
    #[prost(bool, tag = "9")]
    pub updates_only: bool,
}

pub mod subscription_list {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Mode {
        Stream = 0,
        Once = 1,
        Poll = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeRequest {
    #[prost(oneof = "subscribe_request::Request", tags = "1")]
    pub request: Option<subscribe_request::Request>,
}

pub mod subscribe_request {
    use super::SubscriptionList;

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "1")]
        Subscribe(SubscriptionList),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeResponse {
    #[prost(oneof = "subscribe_response::Response", tags = "1, 3")]
    pub response: Option<subscribe_response::Response>,
    #[prost(message, repeated, tag = "5")]
    pub extension: Vec<Extension>,
}

pub mod subscribe_response {
    use super::Notification;

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        Update(Notification),
        #[prost(bool, tag = "3")]
        SyncResponse(bool),
    }
}

/// A registered protocol extension attached to a response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Extension {
    #[prost(oneof = "extension::Ext", tags = "1")]
    pub ext: Option<extension::Ext>,
}

pub mod extension {
    use super::RegisteredExtension;

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Ext {
        #[prost(message, tag = "1")]
        RegisteredExt(RegisteredExtension),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisteredExtension {
    #[prost(int32, tag = "1")]
    pub id: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub msg: Vec<u8>,
}

/// Vendor telemetry header carried as a registered extension. Component
/// identifiers get promoted into prefix tags when decoding succeeds.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TelemetryHeader {
    #[prost(string, tag = "1")]
    pub system_id: String,
    #[prost(uint32, tag = "2")]
    pub component_id: u32,
    #[prost(uint32, tag = "3")]
    pub sub_component_id: u32,
    #[prost(string, tag = "4")]
    pub sensor_name: String,
    #[prost(string, tag = "5")]
    pub subscribed_path: String,
    #[prost(string, tag = "6")]
    pub streamed_path: String,
    #[prost(string, tag = "7")]
    pub component: String,
    #[prost(uint64, tag = "8")]
    pub sequence_number: u64,
    #[prost(int64, tag = "9")]
    pub payload_get_timestamp: i64,
    #[prost(int64, tag = "10")]
    pub stream_creation_timestamp: i64,
    #[prost(int64, tag = "11")]
    pub event_timestamp: i64,
    #[prost(int64, tag = "12")]
    pub export_timestamp: i64,
}

/// Thin Subscribe client over a tonic channel, matching the shape
/// tonic-build emits for the gNMI service.
pub mod client {
    use super::{SubscribeRequest, SubscribeResponse};
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct GnmiClient {
        inner: tonic::client::Grpc<tonic::transport::Channel>,
    }

    impl GnmiClient {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        /// Open the bidirectional Subscribe stream.
        pub async fn subscribe(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = SubscribeRequest>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<SubscribeResponse>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("service was not ready: {e}"))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/gnmi.gNMI/Subscribe");
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("gnmi.gNMI", "Subscribe"));
            self.inner.streaming(req, path, codec).await
        }
    }
}
