// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker pool readiness and liveness with real workers.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{EchoFunction, eventually, faas_pair};
use membrane::worker::{HttpWorker, Worker};
use membrane::{PoolError, WorkerPool, WorkerPoolConfig};

fn pool(min: usize, max: usize) -> WorkerPool {
    WorkerPool::new(WorkerPoolConfig {
        min_workers: min,
        max_workers: max,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_get_worker_fails_fast_without_workers() {
    let pool = pool(1, 1);

    let started = Instant::now();
    let result = pool.get_worker();

    assert!(matches!(result, Err(PoolError::NoWorkersAvailable)));
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn test_readiness_times_out_after_deadline() {
    let pool = pool(1, 1);

    let started = Instant::now();
    let err = pool
        .wait_for_active_workers(Duration::from_secs(1))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        PoolError::ReadinessTimeout {
            active, required, ..
        } => {
            assert_eq!(active, 0);
            assert_eq!(required, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(elapsed >= Duration::from_millis(950), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
}

#[tokio::test]
async fn test_readiness_with_http_worker() {
    let function = EchoFunction::start().await;
    let pool = pool(1, 1);

    let worker = HttpWorker::connect(function.address(), Duration::from_secs(2))
        .await
        .unwrap();
    pool.add_worker(Arc::new(worker)).unwrap();

    pool.wait_for_active_workers(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(pool.get_worker().unwrap().worker_type(), "http");
}

#[tokio::test]
async fn test_closed_faas_stream_leaves_pool() {
    let pool = Arc::new(pool(1, 2));
    let (worker, function) = faas_pair(Duration::from_secs(5));
    pool.add_worker(Arc::new(worker)).unwrap();
    assert_eq!(pool.active_workers(), 1);

    drop(function);

    let watched = pool.clone();
    assert!(eventually(Duration::from_secs(2), move || watched.active_workers() == 0).await);
    assert!(matches!(pool.get_worker(), Err(PoolError::NoWorkersAvailable)));

    let result = tokio::time::timeout(Duration::from_secs(2), pool.monitor())
        .await
        .unwrap();
    assert!(matches!(result, Err(PoolError::BelowMinimum { .. })));
}

#[tokio::test]
async fn test_stop_interrupts_readiness_wait() {
    let pool = Arc::new(pool(1, 1));
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.wait_for_active_workers(Duration::from_secs(10)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.stop();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(PoolError::Stopped)));
}
