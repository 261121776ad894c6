// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FaaS stream worker.
//!
//! The function opens one long-lived stream to the membrane and every trigger
//! is multiplexed over it. Each outbound `TriggerRequest` carries a fresh
//! correlation ID; the caller parks on a oneshot registered under that ID and
//! the stream's read loop completes it when the matching `TriggerResponse`
//! arrives.
//!
//! Invariants:
//! - a waiter is registered before its request frame is queued for writing
//! - the read loop removes a waiter atomically before completing it, so no
//!   waiter is completed twice
//! - a waiter that gives up (deadline or cancellation) removes its own entry
//! - when the stream dies every outstanding waiter is failed and the registry
//!   refuses new registrations

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use membrane_protocol::faas_proto::{
    self, HeaderValue, HttpTriggerContext, TopicTriggerContext, TriggerRequest, TriggerResponse,
    message, trigger_request, trigger_response,
};
use membrane_protocol::{Frame, FramedStream, MessageType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Result, Worker, WorkerError};
use crate::trigger::{Event, Headers, HttpRequest, HttpResponse};

/// Default deadline for a correlated response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound frames buffered ahead of the write loop.
const OUTBOUND_BUFFER: usize = 256;

type Reply = std::result::Result<TriggerResponse, WorkerError>;

#[derive(Default)]
struct RegistryState {
    waiters: HashMap<String, oneshot::Sender<Reply>>,
    closed: Option<String>,
}

/// In-flight correlation entries for one stream.
#[derive(Default)]
pub struct PendingRegistry {
    state: Mutex<RegistryState>,
}

impl PendingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for `id`.
    ///
    /// The returned [`Ticket`] removes the entry when dropped, so a waiter
    /// that stops waiting for any reason never leaves a dangling entry.
    pub fn register(
        self: &Arc<Self>,
        id: &str,
    ) -> Result<(Ticket, oneshot::Receiver<Reply>)> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(WorkerError::StreamClosed(reason.clone()));
        }
        if state.waiters.contains_key(id) {
            return Err(WorkerError::DuplicateCorrelationId(id.to_string()));
        }
        state.waiters.insert(id.to_string(), tx);
        drop(state);

        Ok((
            Ticket {
                registry: Arc::clone(self),
                id: id.to_string(),
            },
            rx,
        ))
    }

    /// Complete the waiter for `id`. Returns false when nobody waits on it.
    pub fn resolve(&self, id: &str, reply: Reply) -> bool {
        let waiter = self.lock().waiters.remove(id);
        match waiter {
            // A waiter that timed out concurrently has dropped its receiver.
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `id` without completing it.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().waiters.remove(id).is_some()
    }

    /// Fail every outstanding waiter and refuse further registrations.
    ///
    /// Returns the number of waiters failed. Channels are completed after the
    /// lock is released.
    pub fn close(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.waiters.drain().collect()
        };

        let failed = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(WorkerError::StreamClosed(reason.to_string())));
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().waiters.contains_key(id)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }
}

/// Registration handle; dropping it unregisters the correlation ID.
pub struct Ticket {
    registry: Arc<PendingRegistry>,
    id: String,
}

impl Ticket {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Worker attached over a single bidirectional stream.
pub struct FaasStreamWorker {
    id: String,
    registry: Arc<PendingRegistry>,
    outbound: mpsc::Sender<Frame>,
    alive: Arc<AtomicBool>,
    response_timeout: Duration,
    reader: JoinHandle<()>,
}

impl FaasStreamWorker {
    /// Take over an already handshaken stream.
    ///
    /// Spawns the read loop and a write loop; frames are only ever written by
    /// the write loop so a cancelled caller can never leave a partial frame on
    /// the stream.
    pub fn new<R, W>(reader: R, writer: W, response_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let registry = PendingRegistry::new();
        let alive = Arc::new(AtomicBool::new(true));
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

        let reader = tokio::spawn(read_loop(
            FramedStream::new(reader),
            Arc::clone(&registry),
            Arc::clone(&alive),
            id.clone(),
        ));
        tokio::spawn(write_loop(
            FramedStream::new(writer),
            outbound_rx,
            Arc::clone(&registry),
            Arc::clone(&alive),
            id.clone(),
        ));

        info!(worker_id = %id, "faas stream worker attached");

        Self {
            id,
            registry,
            outbound,
            alive,
            response_timeout,
            reader,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Send one trigger and wait for its correlated response.
    ///
    /// One deadline covers queueing the request and waiting for the reply, so
    /// a function that stops reading cannot park callers on a full outbound
    /// buffer.
    pub async fn call(&self, request: TriggerRequest) -> Result<TriggerResponse> {
        let deadline = Instant::now() + self.response_timeout;
        let correlation_id = Uuid::new_v4().to_string();
        let (_ticket, reply) = self.registry.register(&correlation_id)?;

        let frame = Frame::stream_data(&faas_proto::Message::trigger_request(
            correlation_id.as_str(),
            request,
        ))?;
        match tokio::time::timeout_at(deadline, self.outbound.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(WorkerError::StreamClosed(
                    "stream writer stopped".to_string(),
                ));
            }
            Err(_) => {
                debug!(worker_id = %self.id, correlation_id = %correlation_id, "deadline elapsed before request was queued");
                return Err(WorkerError::Timeout(self.response_timeout));
            }
        }

        match tokio::time::timeout_at(deadline, reply).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(WorkerError::StreamClosed(
                "response channel dropped".to_string(),
            )),
            Err(_) => {
                debug!(worker_id = %self.id, correlation_id = %correlation_id, "response deadline elapsed");
                Err(WorkerError::Timeout(self.response_timeout))
            }
        }
    }
}

impl Drop for FaasStreamWorker {
    fn drop(&mut self) {
        self.reader.abort();
        self.registry.close("worker dropped");
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut stream: FramedStream<R>,
    registry: Arc<PendingRegistry>,
    alive: Arc<AtomicBool>,
    worker_id: String,
) {
    let reason = loop {
        let frame = match stream.read_frame().await {
            Ok(frame) => frame,
            Err(e) if e.is_closed() => break "stream closed by function".to_string(),
            Err(e) => break format!("stream read failed: {e}"),
        };

        match frame.message_type {
            MessageType::StreamData => {}
            MessageType::StreamEnd => break "function ended the stream".to_string(),
            other => {
                warn!(worker_id = %worker_id, frame = ?other, "ignoring unexpected frame type");
                continue;
            }
        }

        let message: faas_proto::Message = match frame.decode() {
            Ok(message) => message,
            Err(e) => break format!("malformed message: {e}"),
        };

        match message.content {
            Some(message::Content::TriggerResponse(response)) => {
                if !registry.resolve(&message.id, Ok(response)) {
                    warn!(
                        worker_id = %worker_id,
                        correlation_id = %message.id,
                        "response for unknown correlation id"
                    );
                }
            }
            Some(message::Content::InitRequest(_)) => {
                debug!(worker_id = %worker_id, "ignoring repeated init request");
            }
            _ => {
                warn!(
                    worker_id = %worker_id,
                    correlation_id = %message.id,
                    "unexpected message kind from function"
                );
            }
        }
    };

    alive.store(false, Ordering::SeqCst);
    let failed = registry.close(&reason);
    info!(worker_id = %worker_id, failed, reason = %reason, "faas stream ended");
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut stream: FramedStream<W>,
    mut outbound: mpsc::Receiver<Frame>,
    registry: Arc<PendingRegistry>,
    alive: Arc<AtomicBool>,
    worker_id: String,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = stream.write_frame(&frame).await {
            let reason = format!("stream write failed: {e}");
            warn!(worker_id = %worker_id, error = %e, "faas stream write failed");
            alive.store(false, Ordering::SeqCst);
            registry.close(&reason);
            return;
        }
    }

    let _ = stream.write_frame(&Frame::stream_end()).await;
    let _ = stream.shutdown().await;
}

fn header_map(headers: &Headers) -> HashMap<String, HeaderValue> {
    headers
        .iter()
        .map(|(name, values)| {
            (
                name.clone(),
                HeaderValue {
                    value: values.clone(),
                },
            )
        })
        .collect()
}

fn headers_from_map(map: HashMap<String, HeaderValue>) -> Headers {
    let mut headers = Headers::new();
    for (name, values) in map {
        for value in values.value {
            headers.append(&name, value);
        }
    }
    headers
}

/// Convert an HTTP trigger to its wire form.
pub fn http_trigger_request(request: &HttpRequest) -> TriggerRequest {
    TriggerRequest {
        data: request.body().to_vec(),
        mime_type: request
            .headers()
            .get("Content-Type")
            .unwrap_or_default()
            .to_string(),
        context: Some(trigger_request::Context::Http(HttpTriggerContext {
            method: request.method().to_string(),
            path: request.path().to_string(),
            headers: header_map(request.headers()),
            query_params: request
                .query()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            path_params: HashMap::new(),
        })),
    }
}

/// Convert a topic event to its wire form.
pub fn event_trigger_request(event: &Event) -> TriggerRequest {
    TriggerRequest {
        data: event.payload().to_vec(),
        mime_type: String::new(),
        context: Some(trigger_request::Context::Topic(TopicTriggerContext {
            topic: event.topic().to_string(),
        })),
    }
}

#[async_trait]
impl Worker for FaasStreamWorker {
    fn worker_type(&self) -> &'static str {
        "faas"
    }

    async fn handle_http_request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = self.call(http_trigger_request(request)).await?;
        match response.context {
            Some(trigger_response::Context::Http(context)) => Ok(HttpResponse {
                // Out-of-range codes are answered as 500 by the gateways.
                status: u16::try_from(context.status).unwrap_or(0),
                headers: headers_from_map(context.headers),
                body: response.data.into(),
            }),
            Some(trigger_response::Context::Topic(_)) => Err(WorkerError::Protocol(
                "expected http response context, got topic".to_string(),
            )),
            None => Err(WorkerError::Protocol(
                "response has no context".to_string(),
            )),
        }
    }

    async fn handle_event(&self, event: &Event) -> Result<()> {
        let response = self.call(event_trigger_request(event)).await?;
        match response.context {
            Some(trigger_response::Context::Topic(context)) if context.success => Ok(()),
            Some(trigger_response::Context::Topic(_)) => Err(WorkerError::HandlerFailed),
            Some(trigger_response::Context::Http(_)) => Err(WorkerError::Protocol(
                "expected topic response context, got http".to_string(),
            )),
            None => Err(WorkerError::Protocol(
                "response has no context".to_string(),
            )),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
