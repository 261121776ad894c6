// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messages exchanged on a FaaS stream.
//!
//! A worker attaches with a `StreamStart` frame carrying an [`InitRequest`],
//! the membrane answers [`InitResponse`], and from then on every
//! [`TriggerRequest`] sent by the membrane is answered by exactly one
//! [`TriggerResponse`] carrying the same [`Message::id`].
//!
//! ```text
//! message Message {
//!   string id = 1;
//!   oneof content {
//!     InitRequest init_request = 2;
//!     InitResponse init_response = 3;
//!     TriggerRequest trigger_request = 4;
//!     TriggerResponse trigger_response = 5;
//!   }
//! }
//! ```

use std::collections::HashMap;

/// Envelope for every frame on a FaaS stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    /// Correlation ID. Empty for the handshake.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(oneof = "message::Content", tags = "2, 3, 4, 5")]
    pub content: ::core::option::Option<message::Content>,
}

/// Nested types for [`Message`].
pub mod message {
    /// Payload of a [`super::Message`].
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Content {
        #[prost(message, tag = "2")]
        InitRequest(super::InitRequest),
        #[prost(message, tag = "3")]
        InitResponse(super::InitResponse),
        #[prost(message, tag = "4")]
        TriggerRequest(super::TriggerRequest),
        #[prost(message, tag = "5")]
        TriggerResponse(super::TriggerResponse),
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct InitRequest {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct InitResponse {}

/// Trigger delivered to the worker.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TriggerRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "2")]
    pub mime_type: ::prost::alloc::string::String,
    #[prost(oneof = "trigger_request::Context", tags = "3, 4")]
    pub context: ::core::option::Option<trigger_request::Context>,
}

/// Nested types for [`TriggerRequest`].
pub mod trigger_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Context {
        #[prost(message, tag = "3")]
        Http(super::HttpTriggerContext),
        #[prost(message, tag = "4")]
        Topic(super::TopicTriggerContext),
    }
}

/// All values of one header name.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderValue {
    #[prost(string, repeated, tag = "1")]
    pub value: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpTriggerContext {
    #[prost(string, tag = "1")]
    pub method: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
    #[prost(map = "string, message", tag = "3")]
    pub headers: HashMap<::prost::alloc::string::String, HeaderValue>,
    #[prost(map = "string, string", tag = "4")]
    pub query_params: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
    #[prost(map = "string, string", tag = "5")]
    pub path_params: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TopicTriggerContext {
    #[prost(string, tag = "1")]
    pub topic: ::prost::alloc::string::String,
}

/// Worker result for a [`TriggerRequest`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TriggerResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(oneof = "trigger_response::Context", tags = "10, 11")]
    pub context: ::core::option::Option<trigger_response::Context>,
}

/// Nested types for [`TriggerResponse`].
pub mod trigger_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Context {
        #[prost(message, tag = "10")]
        Http(super::HttpResponseContext),
        #[prost(message, tag = "11")]
        Topic(super::TopicResponseContext),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpResponseContext {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(map = "string, message", tag = "2")]
    pub headers: HashMap<::prost::alloc::string::String, HeaderValue>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TopicResponseContext {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

impl Message {
    /// Handshake opener sent by a worker.
    pub fn init_request() -> Self {
        Self {
            id: String::new(),
            content: Some(message::Content::InitRequest(InitRequest {})),
        }
    }

    /// Handshake acknowledgement sent by the membrane.
    pub fn init_response() -> Self {
        Self {
            id: String::new(),
            content: Some(message::Content::InitResponse(InitResponse {})),
        }
    }

    pub fn trigger_request(id: impl Into<String>, request: TriggerRequest) -> Self {
        Self {
            id: id.into(),
            content: Some(message::Content::TriggerRequest(request)),
        }
    }

    pub fn trigger_response(id: impl Into<String>, response: TriggerResponse) -> Self {
        Self {
            id: id.into(),
            content: Some(message::Content::TriggerResponse(response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_http_trigger_request_survives_encoding() {
        let mut headers = HashMap::new();
        headers.insert(
            "X-Nitric-Request-Id".to_string(),
            HeaderValue {
                value: vec!["1234".to_string()],
            },
        );
        let request = TriggerRequest {
            data: b"Test".to_vec(),
            mime_type: "text/plain".to_string(),
            context: Some(trigger_request::Context::Http(HttpTriggerContext {
                method: "POST".to_string(),
                path: "/test/".to_string(),
                headers,
                ..Default::default()
            })),
        };
        let msg = Message::trigger_request("abc", request.clone());

        let decoded = Message::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.id, "abc");
        match decoded.content {
            Some(message::Content::TriggerRequest(got)) => assert_eq!(got, request),
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_response_without_context_decodes_to_none() {
        let response = TriggerResponse {
            data: vec![1, 2, 3],
            context: None,
        };
        let decoded = TriggerResponse::decode(response.encode_to_vec().as_slice()).unwrap();
        assert!(decoded.context.is_none());
        assert_eq!(decoded.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_handshake_messages_have_empty_id() {
        assert!(Message::init_request().id.is_empty());
        assert!(matches!(
            Message::init_response().content,
            Some(message::Content::InitResponse(_))
        ));
    }
}
