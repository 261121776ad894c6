// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP worker.
//!
//! Forwards requests verbatim to a function serving HTTP on a fixed address.
//! Events are delivered as `POST /subscriptions/{topic}`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Result, Worker, WorkerError};
use crate::trigger::{Event, HOP_BY_HOP_HEADERS, Headers, HttpRequest, HttpResponse};

/// Interval between dial attempts while waiting for the function's port.
/// Longer intervals noticeably slow down cold starts.
pub const DIAL_POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Worker that talks HTTP to a fixed address.
#[derive(Debug, Clone)]
pub struct HttpWorker {
    address: String,
    client: reqwest::Client,
}

impl HttpWorker {
    /// Create a worker without checking that the address is reachable.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self {
            address: address.into(),
            client,
        })
    }

    /// Wait until `address` accepts TCP connections, then create the worker.
    pub async fn connect(address: impl Into<String>, timeout: Duration) -> Result<Self> {
        let address = address.into();
        wait_for_address(&address, timeout).await?;
        Self::new(address)
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Poll-dial `address` until it accepts a connection or `timeout` elapses.
pub async fn wait_for_address(address: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, TcpStream::connect(address)).await {
            Ok(Ok(_)) => {
                info!(address = %address, "function port is accepting connections");
                return Ok(());
            }
            Ok(Err(e)) => debug!(address = %address, error = %e, "function port not ready"),
            Err(_) => {}
        }

        if Instant::now() + DIAL_POLL_INTERVAL > deadline {
            return Err(WorkerError::DialTimeout {
                address: address.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(DIAL_POLL_INTERVAL).await;
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
        || name.eq_ignore_ascii_case("host")
}

#[async_trait]
impl Worker for HttpWorker {
    fn worker_type(&self) -> &'static str {
        "http"
    }

    async fn handle_http_request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method().as_bytes())
            .map_err(|e| WorkerError::InvalidRequest(e.to_string()))?;
        let url = format!("http://{}{}", self.address, request.path());

        let mut builder = self.client.request(method, &url);
        if !request.query().is_empty() {
            builder = builder.query(request.query());
        }
        for (name, values) in request.headers().iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let upstream = builder.body(request.body().clone()).send().await?;
        let status = upstream.status().as_u16();

        let mut headers = Headers::new();
        for (name, value) in upstream.headers() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), value);
            }
        }
        headers.strip_hop_by_hop();

        let body = upstream.bytes().await?;
        debug!(status, path = %request.path(), "http worker response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn handle_event(&self, event: &Event) -> Result<()> {
        let url = format!("http://{}/subscriptions/{}", self.address, event.topic());

        let upstream = self
            .client
            .post(&url)
            .header("x-nitric-request-id", event.id())
            .header("x-nitric-source-type", "SUBSCRIPTION")
            .header("x-nitric-source", event.topic())
            .body(event.payload().clone())
            .send()
            .await?;

        let status = upstream.status();
        if status.is_success() {
            return Ok(());
        }

        let body = upstream.text().await.unwrap_or_default();
        Err(WorkerError::UpstreamStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop("content-length"));
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("Host"));
        assert!(!is_hop_by_hop("X-Nitric-Request-Id"));
    }

    #[tokio::test]
    async fn test_wait_for_address_times_out() {
        // Bind then drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let address = format!("127.0.0.1:{port}");

        let started = std::time::Instant::now();
        let err = wait_for_address(&address, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::DialTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_wait_for_address_succeeds_once_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        wait_for_address(&address, Duration::from_secs(1)).await.unwrap();
        let worker = HttpWorker::connect(address.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(worker.address(), address);
        assert_eq!(worker.worker_type(), "http");
    }
}
