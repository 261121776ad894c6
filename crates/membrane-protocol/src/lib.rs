// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Membrane Protocol - QUIC + Protobuf communication layer
//!
//! This crate provides the wire protocol spoken on the membrane's local
//! service listener:
//! - FaaS stream workers attaching to the membrane (`faas_proto`)
//! - User code calling the backend-service facades (`service_proto`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    membrane-protocol                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: facade Request/Response + long-lived FaaS stream│
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn)                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ## Attaching a function
//!
//! ```ignore
//! use membrane_protocol::{FaasClient, MembraneClient, faas_proto};
//!
//! let client = MembraneClient::localhost("127.0.0.1:50051".parse()?)?;
//! FaasClient::new(client)
//!     .serve(|request: faas_proto::TriggerRequest| async move {
//!         faas_proto::TriggerResponse {
//!             data: request.data,
//!             context: Some(faas_proto::trigger_response::Context::Topic(
//!                 faas_proto::TopicResponseContext { success: true },
//!             )),
//!         }
//!     })
//!     .await?;
//! ```
//!
//! ## Calling a facade
//!
//! ```ignore
//! use membrane_protocol::{MembraneClient, service_proto};
//!
//! let client = MembraneClient::localhost("127.0.0.1:50051".parse()?)?;
//! let request = service_proto::ServiceRequest {
//!     request: Some(service_proto::service_request::Request::KvGet(
//!         service_proto::KvGetRequest { store: "users".into(), key: "42".into() },
//!     )),
//! };
//! let response = client.call(&request).await?;
//! ```

pub mod client;
pub mod faas_proto;
pub mod frame;
pub mod server;
pub mod service_proto;

pub use client::{ClientError, FaasClient, MembraneClient, MembraneClientConfig, serve_stream};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use server::{
    ConnectionHandler, MembraneServer, MembraneServerConfig, ServerError, StreamHandler,
};
