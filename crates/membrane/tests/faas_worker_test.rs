// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FaaS stream worker tests over an in-memory stream.
//!
//! Cover correlation under concurrency, stream loss with requests in flight,
//! and deadline cleanup.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, faas_pair, http_response, topic_response};
use futures::future::join_all;
use membrane::worker::{FaasStreamWorker, Worker, WorkerError};
use membrane::{Event, HttpRequest};
use membrane_protocol::faas_proto::trigger_request;
use uuid::Uuid;

#[tokio::test]
async fn test_concurrent_calls_get_their_own_responses() {
    let (worker, function) = faas_pair(Duration::from_secs(5));
    let worker = Arc::new(worker);

    tokio::spawn(function.serve(|request| async move {
        // Random latency so responses come back out of order.
        let jitter = Uuid::new_v4().as_bytes()[0] % 40;
        tokio::time::sleep(Duration::from_millis(u64::from(jitter))).await;
        http_response(200, request.data)
    }));

    let calls = (0..64).map(|i| {
        let worker = worker.clone();
        async move {
            let marker = format!("call-{i}");
            let request = HttpRequest::new("POST", "/echo")
                .unwrap()
                .with_body(marker.clone());
            let response = worker.handle_http_request(&request).await.unwrap();
            assert_eq!(response.status, 200);
            assert_eq!(response.body, marker.as_bytes());
        }
    });
    join_all(calls).await;

    assert_eq!(worker.pending_count(), 0);
    assert!(worker.is_alive());
}

#[tokio::test]
async fn test_http_trigger_carries_request_context() {
    let (worker, mut function) = faas_pair(Duration::from_secs(5));

    let call = tokio::spawn(async move {
        let request = HttpRequest::new("POST", "/test/")
            .unwrap()
            .with_header("x-nitric-request-id", "1234")
            .with_body("Test");
        worker.handle_http_request(&request).await
    });

    let (id, request) = function.next_trigger().await.unwrap();
    assert_eq!(request.data, b"Test");
    match &request.context {
        Some(trigger_request::Context::Http(http)) => {
            assert_eq!(http.method, "POST");
            assert_eq!(http.path, "/test/");
            assert_eq!(http.headers["X-Nitric-Request-Id"].value, vec!["1234"]);
        }
        other => panic!("unexpected context: {other:?}"),
    }
    function.reply(&id, http_response(201, "created")).await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(&response.body[..], b"created");
}

#[tokio::test]
async fn test_event_success_and_failure() {
    let (worker, mut function) = faas_pair(Duration::from_secs(5));
    let worker = Arc::new(worker);

    let delivered = {
        let worker = worker.clone();
        tokio::spawn(async move {
            let event = Event::new("evt-1", "orders", "payload").unwrap();
            worker.handle_event(&event).await
        })
    };
    let (id, request) = function.next_trigger().await.unwrap();
    match &request.context {
        Some(trigger_request::Context::Topic(topic)) => assert_eq!(topic.topic, "orders"),
        other => panic!("unexpected context: {other:?}"),
    }
    function.reply(&id, topic_response(true)).await;
    delivered.await.unwrap().unwrap();

    let rejected = {
        let worker = worker.clone();
        tokio::spawn(async move {
            let event = Event::new("evt-2", "orders", "payload").unwrap();
            worker.handle_event(&event).await
        })
    };
    let (id, _) = function.next_trigger().await.unwrap();
    function.reply(&id, topic_response(false)).await;
    assert!(matches!(
        rejected.await.unwrap(),
        Err(WorkerError::HandlerFailed)
    ));
}

#[tokio::test]
async fn test_stream_loss_fails_every_pending_call() {
    const PENDING: usize = 5;

    let (worker, mut function) = faas_pair(Duration::from_secs(30));
    let worker = Arc::new(worker);

    let calls: Vec<_> = (0..PENDING)
        .map(|i| {
            let worker = worker.clone();
            tokio::spawn(async move {
                let request = HttpRequest::new("GET", format!("/{i}")).unwrap();
                worker.handle_http_request(&request).await
            })
        })
        .collect();

    // Every request is registered before its frame is written.
    for _ in 0..PENDING {
        function.next_trigger().await.unwrap();
    }
    assert_eq!(worker.pending_count(), PENDING);

    drop(function);

    for call in calls {
        let result = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("pending call was not failed")
            .unwrap();
        assert!(matches!(result, Err(WorkerError::StreamClosed(_))));
    }

    assert!(!worker.is_alive());
    assert_eq!(worker.pending_count(), 0);

    let request = HttpRequest::new("GET", "/late").unwrap();
    let err = worker.handle_http_request(&request).await.unwrap_err();
    assert!(matches!(err, WorkerError::StreamClosed(_)));
}

#[tokio::test]
async fn test_timeout_removes_correlation_entry() {
    let (worker, mut function) = faas_pair(Duration::from_millis(100));
    let worker = Arc::new(worker);

    let request = HttpRequest::new("GET", "/slow").unwrap();
    let call = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.handle_http_request(&request).await })
    };

    let (id, _) = function.next_trigger().await.unwrap();
    assert!(worker.registry().contains(&id));

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, WorkerError::Timeout(_)));
    assert!(!worker.registry().contains(&id));
    assert_eq!(worker.pending_count(), 0);

    // A late response for the expired ID is ignored and the stream survives.
    function.reply(&id, http_response(200, "late")).await;

    let call = {
        let worker = worker.clone();
        tokio::spawn(async move {
            let request = HttpRequest::new("GET", "/fast").unwrap();
            worker.handle_http_request(&request).await
        })
    };
    let (id, _) = function.next_trigger().await.unwrap();
    function.reply(&id, http_response(200, "fast")).await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(&response.body[..], b"fast");
    assert!(worker.is_alive());
}

#[tokio::test]
async fn test_unknown_correlation_id_is_ignored() {
    let (worker, mut function) = faas_pair(Duration::from_secs(5));

    function.reply("not-a-pending-id", http_response(200, "")).await;

    let call = tokio::spawn(async move {
        let request = HttpRequest::new("GET", "/").unwrap();
        let result = worker.handle_http_request(&request).await;
        (worker, result)
    });
    let (id, _) = function.next_trigger().await.unwrap();
    function.reply(&id, http_response(204, "")).await;

    let (worker, result) = call.await.unwrap();
    assert_eq!(result.unwrap().status, 204);
    assert!(worker.is_alive());
}

#[tokio::test]
async fn test_mismatched_response_context_is_a_protocol_error() {
    let (worker, mut function) = faas_pair(Duration::from_secs(5));

    let call = tokio::spawn(async move {
        let request = HttpRequest::new("GET", "/").unwrap();
        let result = worker.handle_http_request(&request).await;
        (worker, result)
    });
    let (id, _) = function.next_trigger().await.unwrap();
    function.reply(&id, topic_response(true)).await;

    let (worker, result) = call.await.unwrap();
    assert!(matches!(result, Err(WorkerError::Protocol(_))));
    assert!(worker.is_alive());
}

#[tokio::test]
async fn test_malformed_frame_ends_the_stream() {
    let (worker, mut function) = faas_pair(Duration::from_secs(30));
    let worker = Arc::new(worker);

    let call = {
        let worker = worker.clone();
        tokio::spawn(async move {
            let request = HttpRequest::new("GET", "/").unwrap();
            worker.handle_http_request(&request).await
        })
    };
    function.next_trigger().await.unwrap();
    function.send_garbage().await;

    let result = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("pending call was not failed")
        .unwrap();
    assert!(matches!(result, Err(WorkerError::StreamClosed(_))));

    let worker_ref = worker.clone();
    assert!(eventually(Duration::from_secs(1), move || !worker_ref.is_alive()).await);
}

#[tokio::test]
async fn test_dropping_worker_ends_the_stream() {
    let (worker, mut function) = faas_pair(Duration::from_secs(5));

    drop(worker);

    let next = tokio::time::timeout(Duration::from_secs(2), function.next_trigger())
        .await
        .expect("stream was not ended");
    assert!(next.is_none());
}

#[tokio::test]
async fn test_deadline_covers_a_function_that_stops_reading() {
    // A tiny pipe whose function end is held open but never read, so the
    // write loop stalls and the outbound buffer fills up.
    let (membrane_end, _function_end) = tokio::io::duplex(64);
    let (read, write) = tokio::io::split(membrane_end);
    let worker = Arc::new(FaasStreamWorker::new(
        read,
        write,
        Duration::from_millis(100),
    ));

    let calls = (0..300).map(|_| {
        let worker = worker.clone();
        async move {
            let request = HttpRequest::new("POST", "/")
                .unwrap()
                .with_body("payload");
            tokio::time::timeout(
                Duration::from_secs(3),
                worker.handle_http_request(&request),
            )
            .await
        }
    });
    let results = join_all(calls).await;

    let blocked = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(blocked, 0, "calls outlived their response deadline");
    for result in results {
        assert!(matches!(result, Ok(Err(WorkerError::Timeout(_)))));
    }
    assert_eq!(worker.pending_count(), 0);
}
