// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for membrane integration tests.
//!
//! Provides an echoing HTTP function and an in-memory FaaS stream pair.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::post;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use membrane::WorkerPool;
use membrane::worker::FaasStreamWorker;
use membrane_protocol::faas_proto::{
    self, HttpResponseContext, TopicResponseContext, TriggerRequest, TriggerResponse, message,
    trigger_request, trigger_response,
};
use membrane_protocol::{Frame, FramedStream, MessageType};

/// An event received by the echo function on `/subscriptions/{topic}`.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub topic: String,
    pub request_id: Option<String>,
    pub source_type: Option<String>,
    pub payload: Bytes,
}

/// HTTP function echoing requests back to the caller.
pub struct EchoFunction {
    pub addr: SocketAddr,
    pub events: Arc<Mutex<Vec<ReceivedEvent>>>,
}

impl EchoFunction {
    /// Start the function on a free local port.
    ///
    /// Plain requests are answered with their body and headers plus
    /// `x-echo-method`, `x-echo-path` and `x-echo-query`. Subscription
    /// deliveries are recorded; topic `fail` answers 500.
    pub async fn start() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/subscriptions/{topic}", post(subscription))
            .fallback(echo)
            .with_state(events.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, events }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub async fn events(&self) -> Vec<ReceivedEvent> {
        self.events.lock().await.clone()
    }
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> axum::response::Response {
    let mut response = axum::response::Response::new(Body::from(body));
    let out = response.headers_mut();
    for (name, value) in &headers {
        if name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out.insert("x-echo-method", HeaderValue::from_str(method.as_str()).unwrap());
    out.insert("x-echo-path", HeaderValue::from_str(uri.path()).unwrap());
    if let Some(query) = uri.query() {
        out.insert("x-echo-query", HeaderValue::from_str(query).unwrap());
    }
    response
}

async fn subscription(
    State(events): State<Arc<Mutex<Vec<ReceivedEvent>>>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let failed = topic == "fail";
    events.lock().await.push(ReceivedEvent {
        topic,
        request_id: header("x-nitric-request-id"),
        source_type: header("x-nitric-source-type"),
        payload: body,
    });

    if failed {
        (StatusCode::INTERNAL_SERVER_ERROR, "handler failed").into_response()
    } else {
        StatusCode::OK.into_response()
    }
}

/// Function end of an in-memory FaaS stream.
pub struct FunctionSide {
    pub reader: FramedStream<ReadHalf<DuplexStream>>,
    pub writer: FramedStream<WriteHalf<DuplexStream>>,
}

impl FunctionSide {
    /// Next trigger with its correlation ID; `None` once the membrane ends
    /// the stream.
    pub async fn next_trigger(&mut self) -> Option<(String, TriggerRequest)> {
        next_trigger(&mut self.reader).await
    }

    pub async fn reply(&mut self, id: &str, response: TriggerResponse) {
        let frame =
            Frame::stream_data(&faas_proto::Message::trigger_response(id, response)).unwrap();
        self.writer.write_frame(&frame).await.unwrap();
    }

    /// Write a `StreamData` frame whose payload is not a valid message.
    pub async fn send_garbage(&mut self) {
        let frame = Frame {
            message_type: MessageType::StreamData,
            payload: Bytes::from_static(&[0xff, 0xff, 0xff, 0xff]),
        };
        self.writer.write_frame(&frame).await.unwrap();
    }

    /// Answer every trigger with `handler`, each on its own task.
    pub async fn serve<H, Fut>(self, handler: H)
    where
        H: Fn(TriggerRequest) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = TriggerResponse> + Send + 'static,
    {
        let FunctionSide {
            mut reader,
            mut writer,
        } = self;
        let (replies, mut outbox) = tokio::sync::mpsc::channel::<(String, TriggerResponse)>(64);

        let write_task = tokio::spawn(async move {
            while let Some((id, response)) = outbox.recv().await {
                let frame =
                    Frame::stream_data(&faas_proto::Message::trigger_response(id, response))
                        .unwrap();
                if writer.write_frame(&frame).await.is_err() {
                    break;
                }
            }
        });

        while let Some((id, request)) = next_trigger(&mut reader).await {
            let handler = handler.clone();
            let replies = replies.clone();
            tokio::spawn(async move {
                let response = handler(request).await;
                let _ = replies.send((id, response)).await;
            });
        }
        drop(replies);
        let _ = write_task.await;
    }
}

async fn next_trigger(
    reader: &mut FramedStream<ReadHalf<DuplexStream>>,
) -> Option<(String, TriggerRequest)> {
    loop {
        let frame = reader.read_frame().await.ok()?;
        match frame.message_type {
            MessageType::StreamEnd => return None,
            MessageType::StreamData => {}
            _ => continue,
        }
        let msg: faas_proto::Message = frame.decode().ok()?;
        if let Some(message::Content::TriggerRequest(request)) = msg.content {
            return Some((msg.id, request));
        }
    }
}

/// A FaaS worker wired to an in-memory function end. No handshake is
/// performed; the worker starts on an attached stream.
pub fn faas_pair(response_timeout: Duration) -> (FaasStreamWorker, FunctionSide) {
    let (membrane_end, function_end) = tokio::io::duplex(64 * 1024);
    let (membrane_read, membrane_write) = tokio::io::split(membrane_end);
    let (function_read, function_write) = tokio::io::split(function_end);

    let worker = FaasStreamWorker::new(membrane_read, membrane_write, response_timeout);
    let side = FunctionSide {
        reader: FramedStream::new(function_read),
        writer: FramedStream::new(function_write),
    };
    (worker, side)
}

/// Pool with one FaaS worker whose function records every trigger.
///
/// HTTP triggers are echoed with status 200; events on topic `bad` are
/// reported as failed.
pub fn recording_faas_pool() -> (Arc<WorkerPool>, Arc<std::sync::Mutex<Vec<TriggerRequest>>>) {
    let pool = Arc::new(WorkerPool::default());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let (worker, function) = faas_pair(Duration::from_secs(5));

    let recorded = seen.clone();
    tokio::spawn(function.serve(move |request: TriggerRequest| {
        let recorded = recorded.clone();
        async move {
            recorded.lock().unwrap().push(request.clone());
            match request.context {
                Some(trigger_request::Context::Topic(topic)) => topic_response(topic.topic != "bad"),
                _ => http_response(200, request.data),
            }
        }
    }));

    pool.add_worker(Arc::new(worker)).unwrap();
    (pool, seen)
}

/// HTTP response context with `status` and `body`.
pub fn http_response(status: i32, body: impl Into<Vec<u8>>) -> TriggerResponse {
    TriggerResponse {
        data: body.into(),
        context: Some(trigger_response::Context::Http(HttpResponseContext {
            status,
            headers: Default::default(),
        })),
    }
}

/// Topic response context.
pub fn topic_response(success: bool) -> TriggerResponse {
    TriggerResponse {
        data: Vec::new(),
        context: Some(trigger_response::Context::Topic(TopicResponseContext { success })),
    }
}

/// Client for talking to local listeners, ignoring proxy settings.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Wait until `condition` holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
