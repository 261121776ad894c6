// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plain HTTP gateway.
//!
//! Every request is forwarded to the function as-is, except requests marked
//! with `x-nitric-source-type: SUBSCRIPTION`, which are delivered as events on
//! the topic named by `x-nitric-source`, and schedule ticks on
//! [`SCHEDULE_ROUTE`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::routing::any;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use super::{Gateway, GatewayError, HttpListener, dispatch, serve_http};
use crate::pool::WorkerPool;
use crate::trigger::{Event, Trigger};

pub const SOURCE_TYPE_HEADER: &str = "x-nitric-source-type";
pub const SOURCE_HEADER: &str = "x-nitric-source";
pub const REQUEST_ID_HEADER: &str = "x-nitric-request-id";

/// Route for schedule ticks; `{name}` names the schedule.
pub const SCHEDULE_ROUTE: &str = "/x-nitric-schedule/{name}";

/// Gateway serving plain HTTP.
pub struct HttpGateway {
    listener: HttpListener,
}

impl HttpGateway {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            listener: HttpListener::new(address),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn start(&self, pool: Arc<WorkerPool>) -> Result<(), GatewayError> {
        self.listener.serve(self.name(), router(pool)).await
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.listener.stop();
        Ok(())
    }
}

/// Router answering every path through the pool.
pub fn router(pool: Arc<WorkerPool>) -> Router {
    Router::new()
        .route(SCHEDULE_ROUTE, any(handle_schedule))
        .fallback(handle)
        .layer(DefaultBodyLimit::disable())
        .with_state(pool)
}

async fn handle(
    State(pool): State<Arc<WorkerPool>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let is_subscription = headers
        .get(SOURCE_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("SUBSCRIPTION"));

    if !is_subscription {
        return serve_http(&pool, &method, &uri, &headers, body).await;
    }

    let topic = headers
        .get(SOURCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match Event::new(id, topic, body) {
        Ok(event) => serve_event(&pool, event).await,
        Err(e) => GatewayError::from(e).into_response(),
    }
}

/// A schedule tick: an event on the schedule's name with no payload.
pub fn schedule_event(name: &str) -> Result<Event, GatewayError> {
    Ok(Event::new(Uuid::new_v4().to_string(), name, Bytes::new())?)
}

/// Deliver a schedule tick pushed to [`SCHEDULE_ROUTE`].
pub async fn handle_schedule(
    State(pool): State<Arc<WorkerPool>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match schedule_event(&name) {
        Ok(event) => serve_event(&pool, event).await,
        Err(e) => e.into_response(),
    }
}

/// Deliver one event and answer 200 on success, 500 otherwise.
pub async fn serve_event(pool: &WorkerPool, event: Event) -> axum::response::Response {
    let topic = event.topic().to_string();
    match dispatch(pool, &Trigger::Event(event)).await {
        Ok(_) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "success",
        )
            .into_response(),
        Err(e) => {
            warn!(topic = %topic, error = %e, "event delivery failed");
            e.into_response()
        }
    }
}
