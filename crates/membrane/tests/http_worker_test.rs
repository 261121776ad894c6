// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP worker tests against a local echo function.

mod common;

use std::collections::BTreeMap;

use common::EchoFunction;
use membrane::worker::{HttpWorker, Worker, WorkerError};
use membrane::{Event, HttpRequest, Response, Trigger};

#[tokio::test]
async fn test_http_request_round_trip() {
    let function = EchoFunction::start().await;
    let worker = HttpWorker::new(function.address()).unwrap();

    let mut query = BTreeMap::new();
    query.insert("page".to_string(), "2".to_string());
    let request = HttpRequest::new("POST", "/orders/7")
        .unwrap()
        .with_header("x-nitric-request-id", "1234")
        .with_header("Content-Type", "text/plain")
        .with_query(query)
        .with_body("Test");

    let response = worker.handle_http_request(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"Test");
    assert_eq!(response.headers.get("X-Nitric-Request-Id"), Some("1234"));
    assert_eq!(response.headers.get("x-echo-method"), Some("POST"));
    assert_eq!(response.headers.get("x-echo-path"), Some("/orders/7"));
    assert_eq!(response.headers.get("x-echo-query"), Some("page=2"));
}

#[tokio::test]
async fn test_response_hop_by_hop_headers_stripped() {
    let function = EchoFunction::start().await;
    let worker = HttpWorker::new(function.address()).unwrap();

    let request = HttpRequest::new("POST", "/")
        .unwrap()
        .with_header("X-Kept", "yes")
        .with_body("body");

    let response = worker.handle_http_request(&request).await.unwrap();

    assert_eq!(response.headers.get("X-Kept"), Some("yes"));
    assert!(!response.headers.contains("Content-Length"));
}

#[tokio::test]
async fn test_event_delivered_to_subscription_route() {
    let function = EchoFunction::start().await;
    let worker = HttpWorker::new(function.address()).unwrap();

    let event = Event::new("evt-1", "orders", "payload").unwrap();
    let response = worker.handle(&Trigger::Event(event)).await.unwrap();

    assert!(matches!(response, Response::EventAck { success: true }));
    let events = function.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].topic, "orders");
    assert_eq!(events[0].request_id.as_deref(), Some("evt-1"));
    assert_eq!(events[0].source_type.as_deref(), Some("SUBSCRIPTION"));
    assert_eq!(&events[0].payload[..], b"payload");
}

#[tokio::test]
async fn test_event_non_2xx_is_an_error() {
    let function = EchoFunction::start().await;
    let worker = HttpWorker::new(function.address()).unwrap();

    let event = Event::new("evt-2", "fail", "payload").unwrap();
    let err = worker.handle_event(&event).await.unwrap_err();

    match err {
        WorkerError::UpstreamStatus { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "handler failed");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreachable_function_is_an_error() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let worker = HttpWorker::new(format!("127.0.0.1:{port}")).unwrap();

    let request = HttpRequest::new("GET", "/").unwrap();
    let err = worker.handle_http_request(&request).await.unwrap_err();

    assert!(matches!(err, WorkerError::Http(_)));
}
