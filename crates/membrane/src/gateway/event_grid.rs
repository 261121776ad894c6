// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Azure Event Grid gateway.
//!
//! Event Grid deliveries carry an `aeg-event-type` header and a JSON array of
//! events. `SubscriptionValidation` deliveries are answered directly;
//! `Notification` deliveries are dispatched one event at a time, in order.
//! Schedule ticks arrive on the shared schedule route. Requests without the
//! header are plain HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use super::http::{SCHEDULE_ROUTE, handle_schedule};
use super::{Gateway, GatewayError, HttpListener, dispatch, serve_http};
use crate::pool::WorkerPool;
use crate::trigger::{Event, Trigger};

pub const EVENT_TYPE_HEADER: &str = "aeg-event-type";

/// One event of an Event Grid delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGridEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Gateway for Event Grid push deliveries.
pub struct EventGridGateway {
    listener: HttpListener,
}

impl EventGridGateway {
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
impl Gateway for EventGridGateway {
    fn name(&self) -> &'static str {
        "event-grid"
    }

    async fn start(&self, pool: Arc<WorkerPool>) -> Result<(), GatewayError> {
        self.listener.serve(self.name(), router(pool)).await
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.listener.stop();
        Ok(())
    }
}

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
    let Some(event_type) = headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return serve_http(&pool, &method, &uri, &headers, body).await;
    };

    let events: Vec<EventGridEvent> = match serde_json::from_slice(&body) {
        Ok(events) => events,
        Err(e) => {
            return GatewayError::InvalidPayload(format!("invalid event grid events: {e}"))
                .into_response();
        }
    };

    let result = match event_type.as_str() {
        "SubscriptionValidation" => validate_subscription(&events),
        "Notification" => deliver_notifications(&pool, events).await,
        other => Err(GatewayError::InvalidPayload(format!(
            "unsupported event grid event type {other}"
        ))),
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(event_type = %event_type, error = %e, "event grid delivery failed");
            e.into_response()
        }
    }
}

fn validation_code(data: &Value) -> Option<&str> {
    data.as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("validationCode"))
        .and_then(|(_, value)| value.as_str())
}

fn validate_subscription(events: &[EventGridEvent]) -> Result<axum::response::Response, GatewayError> {
    let code = events
        .first()
        .and_then(|event| validation_code(&event.data))
        .ok_or_else(|| GatewayError::InvalidPayload("invalid subscription event data".to_string()))?;

    debug!("answering event grid subscription validation");
    Ok((StatusCode::OK, Json(json!({ "ValidationResponse": code }))).into_response())
}

/// Topic name from a topic resource path (last `/` segment).
pub fn topic_name(topic: &str) -> &str {
    topic.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

/// Payload bytes: string data verbatim, other JSON values serialized.
fn payload(data: &Value) -> Vec<u8> {
    match data {
        Value::String(s) => s.clone().into_bytes(),
        Value::Null => Vec::new(),
        other => other.to_string().into_bytes(),
    }
}

async fn deliver_notifications(
    pool: &WorkerPool,
    events: Vec<EventGridEvent>,
) -> Result<axum::response::Response, GatewayError> {
    // Reject the whole delivery before any worker sees a malformed event.
    let triggers = events
        .iter()
        .map(|event| {
            let id = if event.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                event.id.clone()
            };
            Event::new(id, topic_name(&event.topic), payload(&event.data)).map(Trigger::Event)
        })
        .collect::<Result<Vec<_>, _>>()?;

    for trigger in &triggers {
        dispatch(pool, trigger).await?;
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        "success",
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name() {
        assert_eq!(
            topic_name("/subscriptions/x/resourceGroups/y/providers/Microsoft.EventGrid/topics/orders"),
            "orders"
        );
        assert_eq!(topic_name("orders"), "orders");
        assert_eq!(topic_name(""), "");
    }

    #[test]
    fn test_validation_code_is_case_insensitive() {
        assert_eq!(validation_code(&json!({"validationCode": "abc"})), Some("abc"));
        assert_eq!(validation_code(&json!({"ValidationCode": "abc"})), Some("abc"));
        assert_eq!(validation_code(&json!({"code": "abc"})), None);
        assert_eq!(validation_code(&json!("abc")), None);
    }

    #[test]
    fn test_payload_extraction() {
        assert_eq!(payload(&json!("hello")), b"hello");
        assert_eq!(payload(&Value::Null), b"");
        assert_eq!(payload(&json!({"a": 1})), br#"{"a":1}"#);
    }
}
