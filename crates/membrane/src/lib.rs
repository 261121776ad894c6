// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Membrane - sidecar runtime for user functions
//!
//! The membrane runs next to a user function and gives it a uniform view of
//! cloud triggers and backend services. Native trigger traffic is normalized
//! into [`Trigger`]s, handed to a worker from the [`WorkerPool`], and the
//! worker's [`Response`] is translated back into the platform's native answer.
//!
//! # Architecture
//!
//! ```text
//!   platform traffic                              user function
//!  (HTTP, Event Grid,                         ┌──────────────────┐
//!   Pub/Sub, Lambda)                          │  HTTP server     │◄── HttpWorker
//!         │                                   │  or FaaS client  │◄── FaasStreamWorker
//!         ▼                                   └────────┬─────────┘
//!  ┌─────────────┐   Trigger   ┌────────────┐          │ facade calls
//!  │   Gateway   │────────────►│ WorkerPool │          ▼
//!  └─────────────┘◄────────────└────────────┘   ┌──────────────────┐
//!                  Response                     │ Service listener │ (QUIC)
//!                                               │ kv/storage/queue │
//!                                               │ /secrets plugins │
//!                                               └──────────────────┘
//! ```
//!
//! # Operating Modes
//!
//! | Mode | Worker |
//! |------|--------|
//! | `FAAS` (default) | The function attaches over a QUIC stream to the service listener |
//! | `HTTP_PROXY` | The function serves HTTP on `CHILD_ADDRESS` |
//!
//! # Lifecycle
//!
//! ```text
//! Initializing ─► StartingChild ─► WaitingForWorkers ─► Running ─► Stopping ─► Stopped
//!       │
//!       └──────────────── any non-terminal state ──────────────────────────► Failed
//! ```
//!
//! # Configuration
//!
//! See [`config::Config`]; values come from environment variables, and the
//! binary's trailing arguments are the child command line.
//!
//! # Modules
//!
//! - [`trigger`]: Canonical trigger and response model
//! - [`worker`]: Worker abstraction and its HTTP, FaaS stream and process variants
//! - [`pool`]: Worker pool with readiness and liveness supervision
//! - [`gateway`]: Platform adapters
//! - [`services`]: Backend-service facades and the in-memory dev provider
//! - [`server`]: QUIC service listener
//! - [`membrane`]: Orchestrator state machine

/// Membrane configuration loaded from environment variables.
pub mod config;

/// Error types for the membrane.
pub mod error;

/// Platform gateways.
pub mod gateway;

/// Orchestrator.
pub mod membrane;

/// Worker pool.
pub mod pool;

/// QUIC listener for facade calls and FaaS streams.
pub mod server;

/// Backend-service facades.
pub mod services;

/// Canonical trigger model.
pub mod trigger;

/// Workers executing triggers.
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use gateway::{Gateway, GatewayError};
pub use membrane::{Membrane, MembraneBuilder, MembraneState};
pub use pool::{PoolError, WorkerPool, WorkerPoolConfig};
pub use trigger::{Event, Headers, HttpRequest, HttpResponse, Response, Trigger};
pub use worker::{Worker, WorkerError};
