// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Google Pub/Sub push gateway.
//!
//! A push delivery is a JSON envelope
//! `{"message": {"data": <base64>, "attributes": {..}, "id": ".."}, "subscription": ".."}`.
//! Bodies that do not parse as an envelope with a subscription are plain HTTP.
//! Cloud Scheduler jobs push to the shared schedule route.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::routing::any;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use super::http::{SCHEDULE_ROUTE, handle_schedule, serve_event};
use super::{Gateway, GatewayError, HttpListener, serve_http};
use crate::pool::WorkerPool;
use crate::trigger::Event;

/// Route prefix naming the topic of a push subscription.
pub const TOPIC_ROUTE: &str = "/x-nitric-topic/";

/// Message attribute naming the topic.
pub const TOPIC_ATTRIBUTE: &str = "x-nitric-topic";

#[derive(Debug, Default, Deserialize)]
pub struct PubSubMessage {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Base64-encoded payload.
    #[serde(default)]
    pub data: String,
    #[serde(default, alias = "messageId")]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct PubSubEnvelope {
    #[serde(default)]
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: String,
}

impl PubSubEnvelope {
    /// Parse `body` as a push envelope; `None` when it is not one.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(body)
            .ok()
            .filter(|envelope| !envelope.subscription.is_empty())
    }

    /// Topic from the route, the message attributes or the subscription name.
    pub fn topic<'a>(&'a self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(TOPIC_ROUTE)
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .or_else(|| {
                self.message
                    .attributes
                    .get(TOPIC_ATTRIBUTE)
                    .map(String::as_str)
                    .filter(|name| !name.is_empty())
            })
            .or_else(|| {
                self.subscription
                    .rsplit('/')
                    .next()
                    .filter(|name| !name.is_empty())
            })
    }

    /// Convert to an [`Event`] for a request on `path`.
    pub fn into_event(self, path: &str) -> Result<Event, GatewayError> {
        let topic = self
            .topic(path)
            .ok_or_else(|| GatewayError::InvalidPayload("can not handle event for empty topic".to_string()))?
            .to_string();
        let payload = STANDARD
            .decode(self.message.data.as_bytes())
            .map_err(|e| GatewayError::InvalidPayload(format!("invalid message data: {e}")))?;
        let id = if self.message.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.message.id
        };
        Ok(Event::new(id, topic, payload)?)
    }
}

/// Gateway for Pub/Sub push subscriptions.
pub struct PubSubGateway {
    listener: HttpListener,
}

impl PubSubGateway {
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
impl Gateway for PubSubGateway {
    fn name(&self) -> &'static str {
        "pubsub"
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
    let Some(envelope) = PubSubEnvelope::parse(&body) else {
        return serve_http(&pool, &method, &uri, &headers, body).await;
    };

    match envelope.into_event(uri.path()) {
        Ok(event) => serve_event(&pool, event).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> PubSubEnvelope {
        PubSubEnvelope::parse(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_requires_subscription() {
        assert!(PubSubEnvelope::parse(br#"{"message":{"data":""}}"#).is_none());
        assert!(PubSubEnvelope::parse(b"not json").is_none());
        assert!(PubSubEnvelope::parse(br#"{"subscription":"projects/p/subscriptions/s"}"#).is_some());
    }

    #[test]
    fn test_topic_resolution_order() {
        let env = envelope(
            r#"{"message":{"attributes":{"x-nitric-topic":"from-attr"}},"subscription":"projects/p/subscriptions/from-sub"}"#,
        );
        assert_eq!(env.topic("/x-nitric-topic/from-route"), Some("from-route"));
        assert_eq!(env.topic("/"), Some("from-attr"));

        let env = envelope(r#"{"subscription":"projects/p/subscriptions/from-sub"}"#);
        assert_eq!(env.topic("/"), Some("from-sub"));
    }

    #[test]
    fn test_into_event_decodes_base64() {
        let env = envelope(
            r#"{"message":{"data":"aGVsbG8=","id":"m-1"},"subscription":"projects/p/subscriptions/orders"}"#,
        );
        let event = env.into_event("/").unwrap();
        assert_eq!(event.id(), "m-1");
        assert_eq!(event.topic(), "orders");
        assert_eq!(&event.payload()[..], b"hello");
    }

    #[test]
    fn test_into_event_rejects_bad_base64() {
        let env = envelope(r#"{"message":{"data":"***"},"subscription":"s"}"#);
        assert!(matches!(
            env.into_event("/"),
            Err(GatewayError::InvalidPayload(_))
        ));
    }
}
