// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker pool.
//!
//! Owns the workers serving the function, gates gateway startup on worker
//! readiness and supervises worker liveness while the membrane runs.
//!
//! Workers are only ever added. A dead worker is skipped by selection and is
//! dropped from the list only once nothing else holds a reference to it, so a
//! worker is never removed while a request is in flight on it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::worker::Worker;

/// Errors from pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool already holds its maximum number of live workers.
    #[error("max worker capacity reached ({max})")]
    AtCapacity {
        /// Configured capacity.
        max: usize,
    },

    /// No live worker to take the request.
    #[error("no workers available")]
    NoWorkersAvailable,

    /// Readiness was not reached before the deadline.
    #[error(
        "available workers below required minimum of {required}, {active} available, timed out after {timeout:?} waiting for more workers"
    )]
    ReadinessTimeout {
        timeout: Duration,
        active: usize,
        required: usize,
    },

    /// Live workers dropped below the minimum while running.
    #[error("available workers below required minimum of {required}, {active} available")]
    BelowMinimum { required: usize, active: usize },

    /// The pool was stopped.
    #[error("worker pool stopped")]
    Stopped,
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Pool sizing and polling configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Live workers required for readiness and while running.
    pub min_workers: usize,
    /// Maximum live workers.
    pub max_workers: usize,
    /// Poll interval for [`WorkerPool::wait_for_active_workers`].
    pub poll_interval: Duration,
    /// Liveness check interval for [`WorkerPool::monitor`].
    pub monitor_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 1,
            poll_interval: Duration::from_millis(15),
            monitor_interval: Duration::from_millis(100),
        }
    }
}

/// Set of workers serving the function.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    workers: Mutex<Vec<Arc<dyn Worker>>>,
    /// Slots claimed by [`Reservation`]s; only changed under the workers lock
    /// except when an unfilled reservation is released.
    reserved: AtomicUsize,
    shutdown: Arc<Notify>,
    stopped: AtomicBool,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(WorkerPoolConfig::default())
    }
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            workers: Mutex::new(Vec::new()),
            reserved: AtomicUsize::new(0),
            shutdown: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Worker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Workers needed for readiness; never less than one.
    pub fn required_workers(&self) -> usize {
        self.config.min_workers.max(1)
    }

    /// Prune unreferenced dead workers and check for a free slot.
    ///
    /// Returns the live count. Must be called with the workers lock held.
    fn claim(&self, workers: &mut Vec<Arc<dyn Worker>>) -> Result<usize> {
        // Dead workers nobody else references can go.
        workers.retain(|w| w.is_alive() || Arc::strong_count(w) > 1);

        let live = workers.iter().filter(|w| w.is_alive()).count();
        if live + self.reserved.load(Ordering::SeqCst) >= self.config.max_workers {
            warn!(max = self.config.max_workers, "rejecting worker, pool at capacity");
            return Err(PoolError::AtCapacity {
                max: self.config.max_workers,
            });
        }
        Ok(live)
    }

    /// Add a worker, failing when the pool is at capacity.
    pub fn add_worker(&self, worker: Arc<dyn Worker>) -> Result<()> {
        let mut workers = self.lock();
        let live = self.claim(&mut workers)?;

        info!(worker_type = worker.worker_type(), live = live + 1, "worker added to pool");
        workers.push(worker);
        Ok(())
    }

    /// Claim a slot for a worker that is still being set up.
    ///
    /// The slot counts against capacity until the reservation is filled or
    /// dropped.
    pub fn reserve(&self) -> Result<Reservation<'_>> {
        let mut workers = self.lock();
        self.claim(&mut workers)?;
        self.reserved.fetch_add(1, Ordering::SeqCst);
        Ok(Reservation {
            pool: self,
            filled: false,
        })
    }

    /// True when another live worker would be accepted.
    pub fn has_capacity(&self) -> bool {
        self.active_workers() + self.reserved.load(Ordering::SeqCst) < self.config.max_workers
    }

    /// First live worker; never blocks.
    pub fn get_worker(&self) -> Result<Arc<dyn Worker>> {
        self.lock()
            .iter()
            .find(|w| w.is_alive())
            .cloned()
            .ok_or(PoolError::NoWorkersAvailable)
    }

    /// Number of live workers.
    pub fn active_workers(&self) -> usize {
        self.lock().iter().filter(|w| w.is_alive()).count()
    }

    /// Number of workers held, live or dead.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the required number of live workers is present.
    pub async fn wait_for_active_workers(&self, timeout: Duration) -> Result<()> {
        let required = self.required_workers();
        let deadline = Instant::now() + timeout;

        loop {
            let active = self.active_workers();
            if active >= required {
                debug!(active, required, "worker pool ready");
                return Ok(());
            }
            if self.stopped.load(Ordering::SeqCst) {
                return Err(PoolError::Stopped);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::ReadinessTimeout {
                    timeout,
                    active,
                    required,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Supervise worker liveness until [`stop`](Self::stop) is called.
    ///
    /// Returns an error as soon as live workers drop below the minimum.
    pub async fn monitor(&self) -> Result<()> {
        let required = self.required_workers();
        loop {
            let notified = self.shutdown.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.stopped.load(Ordering::SeqCst) {
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = &mut notified => {
                    debug!("pool monitor stopping");
                    return Ok(());
                }

                _ = tokio::time::sleep(self.config.monitor_interval) => {
                    let active = self.active_workers();
                    if active < required {
                        error!(active, required, "worker pool below minimum");
                        return Err(PoolError::BelowMinimum { required, active });
                    }
                }
            }
        }
    }

    /// Handle that wakes the monitor when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Stop the monitor and any readiness waiters.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}

/// A claimed pool slot.
pub struct Reservation<'a> {
    pool: &'a WorkerPool,
    filled: bool,
}

impl Reservation<'_> {
    /// Put `worker` into the claimed slot.
    pub fn fill(mut self, worker: Arc<dyn Worker>) {
        let mut workers = self.pool.lock();
        info!(worker_type = worker.worker_type(), "reserved worker added to pool");
        workers.push(worker);
        self.pool.reserved.fetch_sub(1, Ordering::SeqCst);
        self.filled = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.filled {
            self.pool.reserved.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
