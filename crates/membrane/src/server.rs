// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service listener.
//!
//! One QUIC endpoint serves two kinds of stream, told apart by their first
//! frame:
//!
//! - `Request`: a single backend-service facade call, answered with one
//!   `Response` frame.
//! - `StreamStart` carrying an init request: a function attaching itself as a
//!   FaaS stream worker. The stream then belongs to the worker for its lifetime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use membrane_protocol::faas_proto::{self, message::Content};
use membrane_protocol::service_proto::{ServiceRequest, ServiceResponse};
use membrane_protocol::{
    ConnectionHandler, Frame, MembraneServer, MembraneServerConfig, MessageType, ServerError,
    StreamHandler,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::pool::WorkerPool;
use crate::services::{ServicePlugins, handle_service_request};
use crate::worker::FaasStreamWorker;

/// Error code sent to a worker that attaches while the pool is full.
pub const POOL_FULL: &str = "POOL_FULL";

/// Shared state of the service listener.
pub struct ServiceState {
    pub pool: Arc<WorkerPool>,
    pub plugins: Arc<ServicePlugins>,
    /// Response deadline for FaaS workers attached through this listener.
    pub faas_response_timeout: Duration,
}

/// QUIC listener for facade calls and FaaS stream workers.
pub struct ServiceListener {
    server: MembraneServer,
    state: Arc<ServiceState>,
}

impl ServiceListener {
    /// Bind the listener on `address` with `transport` settings. Streams are
    /// not accepted until [`run`](Self::run).
    pub fn bind(
        address: SocketAddr,
        transport: MembraneServerConfig,
        state: ServiceState,
    ) -> Result<Self, ServerError> {
        Ok(Self {
            server: MembraneServer::localhost_with_config(address, transport)?,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.server.local_addr()
    }

    /// Serve until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let state = self.state;
        self.server
            .run_until(shutdown, move |conn: ConnectionHandler| {
                let state = state.clone();
                async move {
                    handle_connection(conn, state).await;
                }
            })
            .await;
    }
}

async fn handle_connection(conn: ConnectionHandler, state: Arc<ServiceState>) {
    debug!(remote = %conn.remote_address(), "service connection accepted");

    conn.run(move |stream: StreamHandler| {
        let state = state.clone();
        async move {
            if let Err(e) = handle_stream(stream, state).await {
                error!(error = %e, "service stream failed");
            }
        }
    })
    .await;

    debug!("service connection closed");
}

async fn handle_stream(mut stream: StreamHandler, state: Arc<ServiceState>) -> Result<(), ServerError> {
    let frame = match stream.read_frame().await {
        Ok(frame) => frame,
        Err(ServerError::Frame(e)) if e.is_closed() => return Ok(()),
        Err(e) => return Err(e),
    };

    match frame.message_type {
        MessageType::Request => {
            let response = match frame.decode::<ServiceRequest>() {
                Ok(request) => handle_service_request(&state.plugins, request).await,
                Err(e) => {
                    warn!(error = %e, "undecodable service request");
                    ServiceResponse::error("INVALID_ARGUMENT", e.to_string())
                }
            };
            stream.write_frame(&Frame::response(&response)?).await?;
            stream.finish()
        }
        MessageType::StreamStart => attach_worker(stream, frame, &state).await,
        other => {
            warn!(frame_type = ?other, "unexpected first frame on service stream");
            stream
                .reject("INVALID_ARGUMENT", format!("unexpected {other:?} frame"))
                .await
        }
    }
}

/// Complete the FaaS handshake and hand the stream to a new worker.
async fn attach_worker(
    mut stream: StreamHandler,
    frame: Frame,
    state: &ServiceState,
) -> Result<(), ServerError> {
    let is_init = matches!(
        frame.decode::<faas_proto::Message>(),
        Ok(faas_proto::Message {
            content: Some(Content::InitRequest(_)),
            ..
        })
    );
    if !is_init {
        return stream
            .reject("INVALID_ARGUMENT", "expected init request")
            .await;
    }

    // The slot is claimed before the function is told it is attached.
    let reservation = match state.pool.reserve() {
        Ok(reservation) => reservation,
        Err(e) => {
            warn!(error = %e, "rejecting faas worker");
            return stream.reject(POOL_FULL, e.to_string()).await;
        }
    };

    stream
        .write_frame(&Frame::stream_start(&faas_proto::Message::init_response())?)
        .await?;

    let (send, recv) = stream.into_split();
    let worker = Arc::new(FaasStreamWorker::new(
        recv,
        send,
        state.faas_response_timeout,
    ));
    info!(worker_id = %worker.id(), "faas worker registered");
    reservation.fill(worker);
    Ok(())
}
