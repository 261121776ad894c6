// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock worker for testing.
//!
//! Records every trigger it receives and answers without any I/O.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Result, Worker, WorkerError};
use crate::trigger::{Event, HttpRequest, HttpResponse, Trigger};

/// Mock worker for testing.
pub struct MockWorker {
    calls: Arc<Mutex<Vec<Trigger>>>,
    failing_topics: Arc<Mutex<HashSet<String>>>,
    alive: AtomicBool,
    /// Optional delay to simulate handling time (in milliseconds)
    pub handle_delay_ms: u64,
    /// Status returned for HTTP requests
    pub http_status: u16,
    /// If true, every call fails
    pub fail_by_default: bool,
}

impl Default for MockWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWorker {
    /// Create a mock worker that echoes HTTP bodies and acknowledges events.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            failing_topics: Arc::new(Mutex::new(HashSet::new())),
            alive: AtomicBool::new(true),
            handle_delay_ms: 0,
            http_status: 200,
            fail_by_default: false,
        }
    }

    /// Create a mock worker that fails every call.
    pub fn failing() -> Self {
        Self {
            fail_by_default: true,
            ..Self::new()
        }
    }

    /// Fail events delivered to `topic`.
    pub async fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().await.insert(topic.to_string());
    }

    /// Mark the worker dead, as a closed stream would.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Triggers received so far, in arrival order.
    pub async fn calls(&self) -> Vec<Trigger> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, trigger: Trigger) {
        if self.handle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.handle_delay_ms)).await;
        }
        self.calls.lock().await.push(trigger);
    }
}

#[async_trait]
impl Worker for MockWorker {
    fn worker_type(&self) -> &'static str {
        "mock"
    }

    async fn handle_http_request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.record(Trigger::Http(request.clone())).await;
        if self.fail_by_default {
            return Err(WorkerError::Unavailable("mock failure".to_string()));
        }

        let mut response = HttpResponse::new(self.http_status).with_body(request.body().clone());
        response.headers = request.headers().clone();
        Ok(response)
    }

    async fn handle_event(&self, event: &Event) -> Result<()> {
        self.record(Trigger::Event(event.clone())).await;
        if self.fail_by_default || self.failing_topics.lock().await.contains(event.topic()) {
            return Err(WorkerError::HandlerFailed);
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_http() {
        let worker = MockWorker::new();
        let request = HttpRequest::new("POST", "/echo")
            .unwrap()
            .with_header("x-test", "1")
            .with_body("hello");

        let response = worker.handle_http_request(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"hello");
        assert_eq!(response.headers.get("X-Test"), Some("1"));
    }

    #[tokio::test]
    async fn test_mock_fails_selected_topics() {
        let worker = MockWorker::new();
        worker.fail_topic("bad").await;

        assert!(worker.handle_event(&Event::new("1", "good", "").unwrap()).await.is_ok());
        assert!(matches!(
            worker.handle_event(&Event::new("2", "bad", "").unwrap()).await,
            Err(WorkerError::HandlerFailed)
        ));
    }

    #[test]
    fn test_mock_kill() {
        let worker = MockWorker::new();
        assert!(worker.is_alive());
        worker.kill();
        assert!(!worker.is_alive());
    }
}
