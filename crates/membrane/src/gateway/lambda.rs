// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! AWS Lambda gateway.
//!
//! Pull based: the gateway long-polls the Lambda runtime API for the next
//! invocation, turns the event into triggers, and posts the result back under
//! the invocation's request ID. These event shapes are understood:
//!
//! - API Gateway v2 HTTP events (`rawPath`, `requestContext.http.method`)
//! - health checks (`{"x-nitric-healthcheck": true}`), answered without a worker
//! - schedule ticks (`{"x-nitric-schedule": "<name>"}`), delivered as events
//!   with no payload
//! - SNS record batches (`Records[].Sns`)
//!
//! Any other shape is reported as an invocation error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::http::schedule_event;
use super::{Gateway, GatewayError, dispatch};
use crate::pool::WorkerPool;
use crate::trigger::{Event, Headers, HttpRequest, Response, Trigger};

/// Runtime API version prefix.
pub const RUNTIME_API_VERSION: &str = "2018-06-01";

/// Header carrying the invocation's request ID on `/invocation/next`.
pub const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Key marking a health-check invocation.
pub const HEALTH_CHECK_KEY: &str = "x-nitric-healthcheck";

/// Key naming the schedule of a schedule invocation.
pub const SCHEDULE_KEY: &str = "x-nitric-schedule";

/// One invocation fetched from the runtime API.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub payload: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGatewayV2Request {
    raw_path: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    cookies: Vec<String>,
    #[serde(default)]
    query_string_parameters: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    is_base64_encoded: bool,
    request_context: RequestContext,
}

#[derive(Debug, Deserialize)]
struct RequestContext {
    http: RequestContextHttp,
}

#[derive(Debug, Deserialize)]
struct RequestContextHttp {
    method: String,
}

#[derive(Debug, Deserialize)]
struct SnsEvent {
    #[serde(rename = "Records")]
    records: Vec<SnsRecord>,
}

#[derive(Debug, Deserialize)]
struct SnsRecord {
    #[serde(rename = "Sns")]
    sns: SnsMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SnsMessage {
    #[serde(default)]
    message_id: String,
    topic_arn: String,
    #[serde(default)]
    message: String,
}

/// Event envelope published by the membrane's own topic clients.
#[derive(Debug, Deserialize)]
struct PublishedEvent {
    id: String,
    payload: Value,
}

/// Gateway polling the Lambda runtime API.
pub struct LambdaGateway {
    api: String,
    client: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl LambdaGateway {
    /// Gateway for the runtime API at `api` (`host:port`, as given by
    /// `AWS_LAMBDA_RUNTIME_API`).
    pub fn new(api: impl Into<String>) -> Result<Self, GatewayError> {
        let api = api.into();
        if api.is_empty() {
            return Err(GatewayError::Config(
                "lambda runtime api address is empty".to_string(),
            ));
        }
        // No request timeout: `/invocation/next` blocks until an event arrives.
        let client = reqwest::Client::builder().no_proxy().build()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            api,
            client,
            shutdown,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/{}/runtime/{}", self.api, RUNTIME_API_VERSION, path)
    }

    /// Block until the runtime API hands out the next invocation.
    pub async fn next_invocation(&self) -> Result<Invocation, GatewayError> {
        let response = self.client.get(self.url("invocation/next")).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Runtime(format!(
                "next invocation returned {status}"
            )));
        }

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::Runtime(format!("invocation without {REQUEST_ID_HEADER} header"))
            })?;
        let payload = response.bytes().await?;

        Ok(Invocation {
            request_id,
            payload,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(), GatewayError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Runtime(format!(
                "posting to {path} returned {status}"
            )));
        }
        Ok(())
    }

    async fn complete(&self, request_id: &str, result: Result<Value, GatewayError>) -> Result<(), GatewayError> {
        match result {
            Ok(body) => {
                self.post(&format!("invocation/{request_id}/response"), &body)
                    .await
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "lambda invocation failed");
                let body = json!({
                    "errorMessage": e.to_string(),
                    "errorType": "MembraneError",
                });
                self.post(&format!("invocation/{request_id}/error"), &body)
                    .await
            }
        }
    }
}

#[async_trait]
impl Gateway for LambdaGateway {
    fn name(&self) -> &'static str {
        "lambda"
    }

    #[instrument(skip_all, fields(api = %self.api))]
    async fn start(&self, pool: Arc<WorkerPool>) -> Result<(), GatewayError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }
        info!("lambda gateway polling runtime api");

        loop {
            let invocation = tokio::select! {
                biased;

                _ = shutdown.wait_for(|stopped| *stopped) => {
                    info!("lambda gateway stopped");
                    return Ok(());
                }

                next = self.next_invocation() => next?,
            };

            debug!(request_id = %invocation.request_id, "lambda invocation received");
            let result = handle_invocation(&pool, &invocation.payload).await;
            self.complete(&invocation.request_id, result).await?;
        }
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.shutdown.send_replace(true);
        Ok(())
    }
}

/// Run one invocation payload through the pool and build the runtime API reply.
pub async fn handle_invocation(pool: &WorkerPool, payload: &[u8]) -> Result<Value, GatewayError> {
    let event: Value = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::InvalidPayload(format!("invalid lambda event: {e}")))?;

    if event.get("rawPath").is_some() {
        let request = http_request(event)?;
        return Ok(http_reply(pool, request).await);
    }

    if event.get(HEALTH_CHECK_KEY).is_some() {
        debug!("answering lambda health check");
        return Ok(json!({ "healthy": true }));
    }

    if let Some(schedule) = event.get(SCHEDULE_KEY) {
        let name = schedule.as_str().unwrap_or_default();
        if name.is_empty() {
            return Err(GatewayError::InvalidPayload(
                "unable to identify source schedule".to_string(),
            ));
        }
        dispatch(pool, &Trigger::Event(schedule_event(name)?)).await?;
        return Ok(Value::Null);
    }

    if is_sns(&event) {
        let events = sns_events(event)?;
        for event in events {
            dispatch(pool, &Trigger::Event(event)).await?;
        }
        return Ok(json!({ "success": true }));
    }

    Err(GatewayError::InvalidPayload(
        "unhandled lambda event type".to_string(),
    ))
}

fn is_sns(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .and_then(|records| records.first())
        .and_then(|record| record.get("EventSource").or_else(|| record.get("eventSource")))
        .and_then(Value::as_str)
        == Some("aws:sns")
}

fn http_request(event: Value) -> Result<HttpRequest, GatewayError> {
    let event: ApiGatewayV2Request = serde_json::from_value(event)
        .map_err(|e| GatewayError::InvalidPayload(format!("invalid http event: {e}")))?;

    let mut headers = Headers::new();
    for (name, value) in &event.headers {
        if name.eq_ignore_ascii_case("host") {
            headers.append(FORWARDED_FOR_HEADER, value.as_str());
        } else {
            headers.append(name, value.as_str());
        }
    }
    for cookie in &event.cookies {
        headers.append("Cookie", cookie.as_str());
    }

    let body = match event.body {
        Some(body) if event.is_base64_encoded => STANDARD
            .decode(body.as_bytes())
            .map_err(|e| GatewayError::InvalidPayload(format!("invalid base64 body: {e}")))?,
        Some(body) => body.into_bytes(),
        None => Vec::new(),
    };

    Ok(HttpRequest::new(event.request_context.http.method, event.raw_path)?
        .with_headers(headers)
        .with_query(event.query_string_parameters)
        .with_body(body))
}

/// API Gateway proxy reply; worker failures become a 500 reply.
async fn http_reply(pool: &WorkerPool, request: HttpRequest) -> Value {
    let path = request.path().to_string();
    let (status, headers, body) = match dispatch(pool, &Trigger::Http(request)).await {
        Ok(Response::Http(mut response)) => {
            response.headers.strip_hop_by_hop();
            let status = if (100..=999).contains(&response.status) {
                response.status
            } else {
                warn!(status = response.status, "worker returned invalid status code");
                500
            };
            let headers: BTreeMap<String, String> = response
                .headers
                .into_iter()
                .map(|(name, values)| (name, values.join(",")))
                .collect();
            (status, headers, response.body)
        }
        Ok(Response::EventAck { .. }) => (500, BTreeMap::new(), Bytes::new()),
        Err(e) => {
            warn!(path = %path, error = %e, "http trigger failed");
            (500, BTreeMap::new(), Bytes::from(e.to_string()))
        }
    };

    json!({
        "statusCode": status,
        "headers": headers,
        "body": STANDARD.encode(&body),
        "isBase64Encoded": true,
    })
}

/// Topic name from an SNS topic ARN (last `:` segment).
pub fn topic_from_arn(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or_default()
}

fn sns_events(event: Value) -> Result<Vec<Event>, GatewayError> {
    let event: SnsEvent = serde_json::from_value(event)
        .map_err(|e| GatewayError::InvalidPayload(format!("invalid sns event: {e}")))?;

    event
        .records
        .into_iter()
        .map(|record| {
            let sns = record.sns;
            let topic = topic_from_arn(&sns.topic_arn).to_string();
            let (id, payload) = match serde_json::from_str::<PublishedEvent>(&sns.message) {
                Ok(published) => (published.id, published.payload.to_string().into_bytes()),
                Err(_) => (sns.message_id, sns.message.into_bytes()),
            };
            Ok(Event::new(id, topic, payload)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::MockWorker;

    fn pool_with(worker: Arc<MockWorker>) -> WorkerPool {
        let pool = WorkerPool::default();
        pool.add_worker(worker).unwrap();
        pool
    }

    #[test]
    fn test_topic_from_arn() {
        assert_eq!(topic_from_arn("arn:aws:sns:us-east-1:123456789012:orders"), "orders");
        assert_eq!(topic_from_arn("orders"), "orders");
    }

    #[tokio::test]
    async fn test_http_event_round_trip() {
        let worker = Arc::new(MockWorker::new());
        let pool = pool_with(worker.clone());

        let payload = json!({
            "rawPath": "/orders",
            "headers": {"host": "example.com", "x-custom": "1"},
            "queryStringParameters": {"page": "2"},
            "body": "aGVsbG8=",
            "isBase64Encoded": true,
            "requestContext": {"http": {"method": "POST"}}
        });

        let reply = handle_invocation(&pool, payload.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(reply["statusCode"], 200);
        assert_eq!(reply["isBase64Encoded"], true);
        assert_eq!(reply["body"], "aGVsbG8=");

        let calls = worker.calls().await;
        let Trigger::Http(request) = &calls[0] else {
            panic!("expected http trigger, got {:?}", calls[0]);
        };
        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/orders");
        assert_eq!(request.query()["page"], "2");
        assert_eq!(request.headers().get("X-Forwarded-For"), Some("example.com"));
        assert!(!request.headers().contains("Host"));
        assert_eq!(&request.body()[..], b"hello");
    }

    #[tokio::test]
    async fn test_sns_batch() {
        let worker = Arc::new(MockWorker::new());
        let pool = pool_with(worker.clone());

        let payload = json!({
            "Records": [
                {"EventSource": "aws:sns", "Sns": {
                    "MessageId": "m-1",
                    "TopicArn": "arn:aws:sns:us-east-1:1:orders",
                    "Message": "raw"
                }},
                {"EventSource": "aws:sns", "Sns": {
                    "MessageId": "m-2",
                    "TopicArn": "arn:aws:sns:us-east-1:1:orders",
                    "Message": "{\"id\":\"evt-2\",\"payload\":{\"a\":1}}"
                }}
            ]
        });

        let reply = handle_invocation(&pool, payload.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(reply, json!({"success": true}));

        let calls = worker.calls().await;
        assert_eq!(calls.len(), 2);
        let (Trigger::Event(first), Trigger::Event(second)) = (&calls[0], &calls[1]) else {
            panic!("expected events, got {calls:?}");
        };
        assert_eq!(first.id(), "m-1");
        assert_eq!(first.topic(), "orders");
        assert_eq!(&first.payload()[..], b"raw");
        assert_eq!(second.id(), "evt-2");
        assert_eq!(&second.payload()[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_sns_failure_is_invocation_error() {
        let worker = Arc::new(MockWorker::new());
        worker.fail_topic("orders").await;
        let pool = pool_with(worker);

        let payload = json!({
            "Records": [{"EventSource": "aws:sns", "Sns": {
                "MessageId": "m-1",
                "TopicArn": "arn:aws:sns:us-east-1:1:orders",
                "Message": "raw"
            }}]
        });
        assert!(handle_invocation(&pool, payload.to_string().as_bytes())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_event_does_not_reach_worker() {
        let worker = Arc::new(MockWorker::new());
        let pool = pool_with(worker.clone());

        let err = handle_invocation(&pool, br#"{"something": "else"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPayload(_)));
        assert!(worker.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_skips_worker() {
        let worker = Arc::new(MockWorker::new());
        let pool = pool_with(worker.clone());

        let reply = handle_invocation(&pool, br#"{"x-nitric-healthcheck": true}"#)
            .await
            .unwrap();
        assert_eq!(reply, json!({"healthy": true}));
        assert!(worker.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_becomes_empty_event() {
        let worker = Arc::new(MockWorker::new());
        let pool = pool_with(worker.clone());

        let reply = handle_invocation(&pool, br#"{"x-nitric-schedule": "nightly"}"#)
            .await
            .unwrap();
        assert_eq!(reply, Value::Null);

        let calls = worker.calls().await;
        let Trigger::Event(event) = &calls[0] else {
            panic!("expected event, got {:?}", calls[0]);
        };
        assert_eq!(event.topic(), "nightly");
        assert!(event.payload().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_without_name_is_rejected() {
        let worker = Arc::new(MockWorker::new());
        let pool = pool_with(worker.clone());

        let err = handle_invocation(&pool, br#"{"x-nitric-schedule": ""}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPayload(_)));
        assert!(worker.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_schedule_is_invocation_error() {
        let worker = Arc::new(MockWorker::new());
        worker.fail_topic("nightly").await;
        let pool = pool_with(worker);

        assert!(handle_invocation(&pool, br#"{"x-nitric-schedule": "nightly"}"#)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_http_event_without_worker_is_500_reply() {
        let pool = WorkerPool::default();
        let payload = json!({
            "rawPath": "/",
            "requestContext": {"http": {"method": "GET"}}
        });

        let reply = handle_invocation(&pool, payload.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(reply["statusCode"], 500);
    }

    #[test]
    fn test_new_rejects_empty_api() {
        assert!(matches!(
            LambdaGateway::new(""),
            Err(GatewayError::Config(_))
        ));
    }
}
