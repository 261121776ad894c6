// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workers.
//!
//! A worker is anything that can execute a trigger on behalf of the user
//! function:
//! - `http`: forwards to a fixed address where the function serves HTTP
//! - `faas`: correlates requests over one stream opened by the function
//! - `process`: launches the function and then serves as an HTTP worker
//! - `mock`: in-memory worker for tests

pub mod faas;
pub mod http;
pub mod mock;
pub mod process;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use faas::FaasStreamWorker;
pub use http::HttpWorker;
pub use mock::MockWorker;
pub use process::{ChildProcess, ProcessWorker};

use crate::trigger::{Event, HttpRequest, HttpResponse, Response, Trigger};

/// Errors from worker operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// The worker is not able to take requests.
    #[error("worker unavailable: {0}")]
    Unavailable(String),

    /// The function never opened its port.
    #[error("unable to dial http worker, does it expose a http server at {address}?")]
    DialTimeout {
        /// Address that was dialled.
        address: String,
        /// How long dialling was attempted.
        timeout: Duration,
    },

    /// Outbound HTTP call failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Event delivery answered with a non-2xx status.
    #[error("error processing event ({status}): {body}")]
    UpstreamStatus {
        /// Status returned by the function.
        status: u16,
        /// Response body returned by the function.
        body: String,
    },

    /// No response before the deadline.
    #[error("timed out waiting for worker response after {0:?}")]
    Timeout(Duration),

    /// The worker stream closed with the request in flight.
    #[error("worker stream closed: {0}")]
    StreamClosed(String),

    /// The function answered with a malformed or mismatched response.
    #[error("incorrect response received from function: {0}")]
    Protocol(String),

    /// The function reported that it failed to handle the trigger.
    #[error("function failed to handle the trigger")]
    HandlerFailed,

    /// A correlation ID was registered twice.
    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),

    /// The trigger could not be converted for this worker.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Frame encoding or decoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] membrane_protocol::FrameError),

    /// The child process could not be spawned.
    #[error("failed to start child process: {0}")]
    Spawn(std::io::Error),

    /// The child process exited.
    #[error("child process exited: {0}")]
    ProcessExited(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Something that executes triggers for the user function.
///
/// Workers are shared through the pool as `Arc<dyn Worker>` and called
/// concurrently.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Worker type identifier (e.g., "http", "faas", "process")
    fn worker_type(&self) -> &'static str;

    /// Execute an HTTP request.
    async fn handle_http_request(&self, request: &HttpRequest) -> Result<HttpResponse>;

    /// Deliver an event. `Ok` means the function handled it.
    async fn handle_event(&self, event: &Event) -> Result<()>;

    /// False once the worker can no longer take requests.
    fn is_alive(&self) -> bool {
        true
    }

    /// Execute any trigger, producing the matching response variant.
    async fn handle(&self, trigger: &Trigger) -> Result<Response> {
        match trigger {
            Trigger::Http(request) => self.handle_http_request(request).await.map(Response::Http),
            Trigger::Event(event) => {
                self.handle_event(event).await?;
                Ok(Response::EventAck { success: true })
            }
        }
    }
}
