// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gateways.
//!
//! A gateway receives a platform's native trigger traffic, converts it into
//! [`Trigger`]s, hands each one to a worker from the pool and converts the
//! result back into the native answer.
//!
//! - `http`: plain HTTP ingress, plus `x-nitric-source-type` subscriptions
//! - `event_grid`: Azure Event Grid webhooks
//! - `pubsub`: Google Pub/Sub push subscriptions
//! - `lambda`: AWS Lambda runtime API poller

pub mod event_grid;
pub mod http;
pub mod lambda;
pub mod pubsub;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use event_grid::EventGridGateway;
pub use http::HttpGateway;
pub use lambda::LambdaGateway;
pub use pubsub::PubSubGateway;

use crate::config::{Config, GatewayKind};
use crate::pool::{PoolError, WorkerPool};
use crate::trigger::{Headers, HttpRequest, HttpResponse, Response, Trigger, TriggerError};
use crate::worker::WorkerError;

/// Errors from gateways and from dispatching their triggers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The gateway listener could not bind.
    #[error("failed to bind gateway to {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The gateway listener failed while serving.
    #[error("gateway server error: {0}")]
    Serve(std::io::Error),

    /// Native payload could not be turned into a trigger.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Trigger or response validation failed.
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// No worker could take the trigger.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The worker failed the trigger.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Platform runtime API failure.
    #[error("runtime api error: {0}")]
    Runtime(String),

    /// Outbound HTTP call failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway misconfigured.
    #[error("gateway configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// HTTP status a native caller receives for this error.
    ///
    /// Validation problems are the caller's fault (4xx); everything else is a
    /// temporary failure the caller may retry (5xx).
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            GatewayError::Trigger(TriggerError::ResponseMismatch { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Trigger(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// A platform adapter feeding triggers into the worker pool.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Gateway identifier (e.g., "http", "lambda")
    fn name(&self) -> &'static str;

    /// Serve until stopped or a fatal error occurs.
    ///
    /// Returning `Ok` means a clean shutdown.
    async fn start(&self, pool: Arc<WorkerPool>) -> Result<(), GatewayError>;

    /// Unblock [`start`](Self::start). Idempotent, and may be called before
    /// `start`, in which case `start` returns immediately.
    async fn stop(&self) -> Result<(), GatewayError>;
}

/// Build the gateway selected by `config`.
pub fn from_config(config: &Config) -> Result<Arc<dyn Gateway>, GatewayError> {
    let address = config.gateway_address;
    Ok(match config.gateway {
        GatewayKind::Http => Arc::new(HttpGateway::new(address)),
        GatewayKind::EventGrid => Arc::new(EventGridGateway::new(address)),
        GatewayKind::PubSub => Arc::new(PubSubGateway::new(address)),
        GatewayKind::Lambda => {
            let api = config.lambda_runtime_api.clone().ok_or_else(|| {
                GatewayError::Config("AWS_LAMBDA_RUNTIME_API must be set".to_string())
            })?;
            Arc::new(LambdaGateway::new(api)?)
        }
    })
}

/// Execute one trigger on a worker from the pool.
///
/// Fails fast when the pool has no live worker and rejects a response whose
/// variant does not answer the trigger.
pub async fn dispatch(pool: &WorkerPool, trigger: &Trigger) -> Result<Response, GatewayError> {
    let worker = pool.get_worker()?;
    let response = worker.handle(trigger).await?;
    response.ensure_matches(trigger)?;
    Ok(response)
}

/// Shared HTTP listener with watch-based graceful shutdown.
pub struct HttpListener {
    address: SocketAddr,
    local_addr: OnceLock<SocketAddr>,
    shutdown: watch::Sender<bool>,
}

impl HttpListener {
    pub fn new(address: SocketAddr) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            address,
            local_addr: OnceLock::new(),
            shutdown,
        }
    }

    /// Bound address once serving; useful when configured with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Serve `router` until [`stop`](Self::stop) is called.
    pub async fn serve(&self, name: &'static str, router: Router) -> Result<(), GatewayError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        let listener = tokio::net::TcpListener::bind(self.address)
            .await
            .map_err(|source| GatewayError::Bind {
                address: self.address,
                source,
            })?;
        let local = listener.local_addr().map_err(GatewayError::Serve)?;
        let _ = self.local_addr.set(local);
        info!(gateway = name, addr = %local, "gateway listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            })
            .await
            .map_err(GatewayError::Serve)?;

        info!(gateway = name, "gateway stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Convert axum request headers into trigger headers.
pub fn headers_from_axum(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => out.append(name.as_str(), value),
            Err(_) => debug!(header = %name, "skipping non-ascii header value"),
        }
    }
    out
}

/// Build an [`HttpRequest`] from the parts of an inbound request.
pub fn http_request_from_parts(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<HttpRequest, GatewayError> {
    let query = if uri.query().is_some() {
        Query::<BTreeMap<String, String>>::try_from_uri(uri)
            .map_err(|e| GatewayError::InvalidPayload(format!("invalid query string: {e}")))?
            .0
    } else {
        BTreeMap::new()
    };

    Ok(HttpRequest::new(method.as_str(), uri.path())?
        .with_headers(headers_from_axum(headers))
        .with_query(query)
        .with_body(body))
}

/// Convert a worker's [`HttpResponse`] into an axum response.
///
/// Hop-by-hop headers are dropped and an invalid status becomes 500.
pub fn into_axum_response(mut response: HttpResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
        warn!(status = response.status, "worker returned invalid status code");
        StatusCode::INTERNAL_SERVER_ERROR
    });
    response.headers.strip_hop_by_hop();

    let mut out = axum::response::Response::new(Body::from(response.body));
    *out.status_mut() = status;
    let headers = out.headers_mut();
    for (name, values) in response.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = value.parse() {
                headers.append(name.clone(), value);
            }
        }
    }
    out
}

/// Answer a plain HTTP request through the pool.
pub async fn serve_http(
    pool: &WorkerPool,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let request = match http_request_from_parts(method, uri, headers, body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    match dispatch(pool, &Trigger::Http(request)).await {
        Ok(Response::Http(response)) => into_axum_response(response),
        Ok(Response::EventAck { .. }) => {
            // ensure_matches already rejects this.
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            warn!(path = %uri.path(), error = %e, "http trigger failed");
            e.into_response()
        }
    }
}
