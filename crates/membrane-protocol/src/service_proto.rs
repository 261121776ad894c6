// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend-service facade RPC messages.
//!
//! One bidirectional stream per call: a `Request` frame carrying
//! [`ServiceRequest`], answered by a `Response` frame carrying
//! [`ServiceResponse`]. Failures travel as [`RpcError`] inside the response.

/// Error payload shared by facade responses and rejected stream handshakes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcError {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceRequest {
    #[prost(
        oneof = "service_request::Request",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14"
    )]
    pub request: ::core::option::Option<service_request::Request>,
}

pub mod service_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "1")]
        KvGet(super::KvGetRequest),
        #[prost(message, tag = "2")]
        KvSet(super::KvSetRequest),
        #[prost(message, tag = "3")]
        KvDelete(super::KvDeleteRequest),
        #[prost(message, tag = "4")]
        StorageRead(super::StorageReadRequest),
        #[prost(message, tag = "5")]
        StorageWrite(super::StorageWriteRequest),
        #[prost(message, tag = "6")]
        StorageDelete(super::StorageDeleteRequest),
        #[prost(message, tag = "7")]
        StorageList(super::StorageListRequest),
        #[prost(message, tag = "8")]
        StoragePreSignUrl(super::StoragePreSignUrlRequest),
        #[prost(message, tag = "9")]
        StorageExists(super::StorageExistsRequest),
        #[prost(message, tag = "10")]
        QueueSend(super::QueueSendRequest),
        #[prost(message, tag = "11")]
        QueueReceive(super::QueueReceiveRequest),
        #[prost(message, tag = "12")]
        QueueComplete(super::QueueCompleteRequest),
        #[prost(message, tag = "13")]
        SecretPut(super::SecretPutRequest),
        #[prost(message, tag = "14")]
        SecretAccess(super::SecretAccessRequest),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceResponse {
    #[prost(
        oneof = "service_response::Response",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10"
    )]
    pub response: ::core::option::Option<service_response::Response>,
}

pub mod service_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        /// Acknowledgement for calls without a result.
        #[prost(message, tag = "1")]
        Empty(super::EmptyResponse),
        #[prost(message, tag = "2")]
        KvGet(super::KvGetResponse),
        #[prost(message, tag = "3")]
        StorageRead(super::StorageReadResponse),
        #[prost(message, tag = "4")]
        StorageList(super::StorageListResponse),
        #[prost(message, tag = "5")]
        StoragePreSignUrl(super::StoragePreSignUrlResponse),
        #[prost(message, tag = "6")]
        StorageExists(super::StorageExistsResponse),
        #[prost(message, tag = "7")]
        QueueReceive(super::QueueReceiveResponse),
        #[prost(message, tag = "8")]
        SecretPut(super::SecretPutResponse),
        #[prost(message, tag = "9")]
        SecretAccess(super::SecretAccessResponse),
        #[prost(message, tag = "10")]
        Error(super::RpcError),
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct EmptyResponse {}

// ---------------------------------------------------------------------------
// Key-value
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KvGetRequest {
    #[prost(string, tag = "1")]
    pub store: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KvGetResponse {
    /// Absent when the key does not exist.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub value: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KvSetRequest {
    #[prost(string, tag = "1")]
    pub store: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KvDeleteRequest {
    #[prost(string, tag = "1")]
    pub store: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageReadRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageReadResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub body: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageWriteRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub body: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageDeleteRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageListRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub prefix: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageListResponse {
    #[prost(string, repeated, tag = "1")]
    pub keys: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Operation a pre-signed URL grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PreSignOperation {
    Read = 0,
    Write = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoragePreSignUrlRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
    #[prost(enumeration = "PreSignOperation", tag = "3")]
    pub operation: i32,
    #[prost(uint32, tag = "4")]
    pub expiry_seconds: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoragePreSignUrlResponse {
    #[prost(string, tag = "1")]
    pub url: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageExistsRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StorageExistsResponse {
    #[prost(bool, tag = "1")]
    pub exists: bool,
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueueSendRequest {
    #[prost(string, tag = "1")]
    pub queue: ::prost::alloc::string::String,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub payloads: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueueReceiveRequest {
    #[prost(string, tag = "1")]
    pub queue: ::prost::alloc::string::String,
    /// Maximum number of tasks to lease. Zero means one.
    #[prost(uint32, tag = "2")]
    pub depth: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LeasedTask {
    #[prost(string, tag = "1")]
    pub lease_id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueueReceiveResponse {
    #[prost(message, repeated, tag = "1")]
    pub tasks: ::prost::alloc::vec::Vec<LeasedTask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueueCompleteRequest {
    #[prost(string, tag = "1")]
    pub queue: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub lease_id: ::prost::alloc::string::String,
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecretPutRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecretPutResponse {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecretAccessRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// Version to read, or `latest`.
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecretAccessResponse {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

impl ServiceResponse {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response: Some(service_response::Response::Error(RpcError {
                code: code.into(),
                message: message.into(),
            })),
        }
    }

    pub fn empty() -> Self {
        Self {
            response: Some(service_response::Response::Empty(EmptyResponse {})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_kv_get_distinguishes_missing_from_empty() {
        let missing = KvGetResponse { value: None };
        let empty = KvGetResponse {
            value: Some(Vec::new()),
        };

        let missing = KvGetResponse::decode(missing.encode_to_vec().as_slice()).unwrap();
        let empty = KvGetResponse::decode(empty.encode_to_vec().as_slice()).unwrap();

        assert_eq!(missing.value, None);
        assert_eq!(empty.value, Some(Vec::new()));
    }

    #[test]
    fn test_presign_operation_accessor() {
        let req = StoragePreSignUrlRequest {
            bucket: "b".to_string(),
            key: "k".to_string(),
            operation: PreSignOperation::Write as i32,
            expiry_seconds: 60,
        };
        assert_eq!(req.operation(), PreSignOperation::Write);
    }

    #[test]
    fn test_error_response_helper() {
        let resp = ServiceResponse::error("NOT_FOUND", "missing");
        match resp.response {
            Some(service_response::Response::Error(err)) => {
                assert_eq!(err.code, "NOT_FOUND");
                assert_eq!(err.message, "missing");
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
