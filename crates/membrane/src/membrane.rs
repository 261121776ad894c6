// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The membrane orchestrator.
//!
//! [`Membrane`] wires the service listener, the worker pool and the gateway
//! together and drives them through a fixed lifecycle:
//!
//! ```text
//! Initializing -> StartingChild -> WaitingForWorkers -> Running -> Stopping -> Stopped
//! ```
//!
//! `StartingChild` is skipped when no child command is configured, and any
//! non-terminal state may end in `Failed`.
//!
//! ```rust,ignore
//! let membrane = Membrane::builder().config(Config::from_env()?).build()?;
//! membrane.start().await?; // runs until stop() or a fatal error
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config::{Config, MembraneMode, ServiceProvider};
use crate::error::{Error, Result};
use crate::gateway::{self, Gateway};
use crate::pool::{WorkerPool, WorkerPoolConfig};
use crate::server::{ServiceListener, ServiceState};
use crate::services::ServicePlugins;
use crate::worker::{ChildProcess, HttpWorker, ProcessWorker};

/// How long a stopping gateway may take to drain.
const GATEWAY_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a [`Membrane`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembraneState {
    Initializing,
    StartingChild,
    WaitingForWorkers,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl MembraneState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: MembraneState) -> bool {
        use MembraneState::*;

        match (self, next) {
            (Stopped | Failed, _) => false,
            (_, Failed) => true,
            (Initializing, StartingChild | WaitingForWorkers | Stopping) => true,
            (StartingChild, WaitingForWorkers | Stopping) => true,
            (WaitingForWorkers, Running | Stopping) => true,
            (Running, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MembraneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::StartingChild => "starting_child",
            Self::WaitingForWorkers => "waiting_for_workers",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Builder for creating a [`Membrane`].
#[derive(Default)]
pub struct MembraneBuilder {
    config: Option<Config>,
    gateway: Option<Arc<dyn Gateway>>,
    plugins: Option<ServicePlugins>,
    pool: Option<Arc<WorkerPool>>,
}

impl MembraneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    ///
    /// Default: [`Config::default()`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the gateway.
    ///
    /// Default: the gateway selected by the configuration.
    pub fn gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the backend-service plugins.
    ///
    /// Default: the plugins of the configured provider.
    pub fn plugins(mut self, plugins: ServicePlugins) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Use an existing worker pool, e.g. one with pre-registered workers.
    ///
    /// Default: an empty pool sized by `min_workers`/`max_workers`.
    pub fn pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Result<Membrane> {
        let config = self.config.unwrap_or_default();

        let gateway = match self.gateway {
            Some(gateway) => gateway,
            None => gateway::from_config(&config)?,
        };
        let plugins = self.plugins.unwrap_or_else(|| match config.provider {
            ServiceProvider::Dev => ServicePlugins::dev(),
            ServiceProvider::None => ServicePlugins::none(),
        });
        let pool = self.pool.unwrap_or_else(|| {
            Arc::new(WorkerPool::new(WorkerPoolConfig {
                min_workers: config.min_workers,
                max_workers: config.max_workers,
                ..Default::default()
            }))
        });

        let (state, _) = watch::channel(MembraneState::Initializing);
        let (stop, _) = watch::channel(false);

        Ok(Membrane {
            config,
            gateway,
            plugins: Arc::new(plugins),
            pool,
            state,
            stop,
            started: AtomicBool::new(false),
            service_addr: OnceLock::new(),
        })
    }
}

/// Resources that outlive a single lifecycle phase.
#[derive(Default)]
struct Resources {
    listener: Option<(watch::Sender<bool>, JoinHandle<()>)>,
    child: Option<Arc<ChildProcess>>,
}

/// The sidecar: one gateway, one worker pool, one service listener.
pub struct Membrane {
    config: Config,
    gateway: Arc<dyn Gateway>,
    plugins: Arc<ServicePlugins>,
    pool: Arc<WorkerPool>,
    state: watch::Sender<MembraneState>,
    stop: watch::Sender<bool>,
    started: AtomicBool,
    service_addr: OnceLock<SocketAddr>,
}

impl Membrane {
    /// Create a new builder for configuring the membrane.
    pub fn builder() -> MembraneBuilder {
        MembraneBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> MembraneState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<MembraneState> {
        self.state.subscribe()
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Bound service listener address, once started.
    pub fn service_addr(&self) -> Option<SocketAddr> {
        self.service_addr.get().copied()
    }

    fn transition(&self, next: MembraneState) -> Result<()> {
        let mut refused = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                info!(from = %current, to = %next, "membrane state changed");
                *current = next;
                true
            } else {
                refused = Some(*current);
                false
            }
        });

        match refused {
            Some(from) => Err(Error::InvalidTransition { from, to: next }),
            None => Ok(()),
        }
    }

    /// Run until [`stop`](Self::stop) is called or a fatal error occurs.
    ///
    /// Returns `Ok` for a deliberate stop or a clean gateway shutdown. Can be
    /// called once.
    #[instrument(skip_all, fields(mode = %self.config.mode, gateway = self.gateway.name()))]
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let mut resources = Resources::default();
        let result = self.run(&mut resources).await;

        if let Err(e) = &result {
            error!(error = %e, state = %self.state(), "membrane failed");
        }
        let _ = self.transition(MembraneState::Stopping);
        self.release(resources).await;

        match result {
            Ok(()) => {
                self.transition(MembraneState::Stopped)?;
                info!("membrane stopped");
                Ok(())
            }
            Err(e) => {
                let _ = self.transition(MembraneState::Failed);
                Err(e)
            }
        }
    }

    /// Request a graceful stop and wait until the membrane has stopped.
    pub async fn stop(&self) {
        self.stop.send_replace(true);

        if !self.started.swap(true, Ordering::SeqCst) {
            let _ = self.transition(MembraneState::Stopping);
            let _ = self.transition(MembraneState::Stopped);
            return;
        }

        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }

    async fn run(&self, resources: &mut Resources) -> Result<()> {
        let mut stop = self.stop.subscribe();

        let missing = self.plugins.missing();
        if !missing.is_empty() {
            if !self.config.tolerate_missing_services {
                return Err(Error::MissingServices(missing));
            }
            warn!(missing = ?missing, "starting with missing services");
        }

        // Workers attach through the listener, so it runs from the start.
        let listener = ServiceListener::bind(
            self.config.service_address,
            self.config.quic.clone(),
            ServiceState {
                pool: Arc::clone(&self.pool),
                plugins: Arc::clone(&self.plugins),
                faas_response_timeout: self.config.faas_response_timeout,
            },
        )?;
        let service_addr = listener.local_addr()?;
        let _ = self.service_addr.set(service_addr);
        let (listener_tx, listener_rx) = watch::channel(false);
        resources.listener = Some((listener_tx, tokio::spawn(listener.run(listener_rx))));
        info!(addr = %service_addr, "service listener started");

        if !self.config.child_command.is_empty() {
            self.transition(MembraneState::StartingChild)?;
            let child = Arc::new(ChildProcess::spawn(&self.config.child_command)?);
            resources.child = Some(Arc::clone(&child));

            if self.config.mode == MembraneMode::HttpProxy {
                let worker = tokio::select! {
                    biased;

                    _ = stopped(&mut stop) => return Ok(()),
                    worker = ProcessWorker::attach(
                        child,
                        &self.config.child_address,
                        self.config.child_timeout,
                    ) => worker?,
                };
                self.pool.add_worker(Arc::new(worker))?;
            }
        }

        self.transition(MembraneState::WaitingForWorkers)?;
        let child = resources.child.clone();

        if self.config.mode == MembraneMode::HttpProxy && child.is_none() && self.pool.is_empty() {
            let worker = tokio::select! {
                biased;

                _ = stopped(&mut stop) => return Ok(()),
                worker = HttpWorker::connect(
                    self.config.child_address.as_str(),
                    self.config.child_timeout,
                ) => worker?,
            };
            self.pool.add_worker(Arc::new(worker))?;
        }

        tokio::select! {
            biased;

            _ = stopped(&mut stop) => return Ok(()),
            status = child_exit(child.as_deref()) => return Err(Error::ChildExited(status)),
            ready = self.pool.wait_for_active_workers(self.config.child_timeout) => ready?,
        }

        self.transition(MembraneState::Running)?;
        self.serve(&mut stop, child.as_deref()).await
    }

    /// Running phase: gateway and monitor on their own tasks until one of
    /// them ends, the child exits, or a stop is requested.
    async fn serve(&self, stop: &mut watch::Receiver<bool>, child: Option<&ChildProcess>) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        let pool = Arc::clone(&self.pool);
        let mut gateway_task = tokio::spawn(async move { gateway.start(pool).await });

        let pool = Arc::clone(&self.pool);
        let mut monitor_task = tokio::spawn(async move { pool.monitor().await });

        info!(gateway = self.gateway.name(), workers = self.pool.active_workers(), "membrane running");

        let mut gateway_done = false;
        let mut monitor_done = false;
        let result = tokio::select! {
            biased;

            _ = stopped(stop) => {
                info!("stop requested");
                Ok(())
            }
            status = child_exit(child) => Err(Error::ChildExited(status)),
            joined = &mut gateway_task => {
                gateway_done = true;
                match joined {
                    Ok(Ok(())) => {
                        info!("gateway finished");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                }
            }
            joined = &mut monitor_task => {
                monitor_done = true;
                match joined {
                    Ok(result) => result.map_err(Error::from),
                    Err(e) => Err(e.into()),
                }
            }
        };

        let _ = self.transition(MembraneState::Stopping);

        if let Err(e) = self.gateway.stop().await {
            warn!(error = %e, "gateway stop failed");
        }
        if !gateway_done {
            match tokio::time::timeout(GATEWAY_STOP_TIMEOUT, &mut gateway_task).await {
                Ok(Ok(Err(e))) => warn!(error = %e, "gateway failed while stopping"),
                Ok(Err(e)) => error!(error = %e, "gateway task panicked"),
                Ok(Ok(Ok(()))) => {}
                Err(_) => {
                    warn!("gateway did not stop in time, aborting");
                    gateway_task.abort();
                }
            }
        }

        self.pool.stop();
        if !monitor_done && let Err(e) = monitor_task.await {
            error!(error = %e, "pool monitor task panicked");
        }

        result
    }

    /// Halt the service listener and the child process.
    async fn release(&self, resources: Resources) {
        self.pool.stop();

        if let Some((shutdown, handle)) = resources.listener {
            shutdown.send_replace(true);
            if let Err(e) = handle.await {
                error!(error = %e, "service listener task panicked");
            }
        }

        if let Some(child) = resources.child {
            child.stop().await;
        }
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn child_exit(child: Option<&ChildProcess>) -> String {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::HttpGateway;
    use crate::worker::MockWorker;

    fn test_config() -> Config {
        Config {
            service_address: "127.0.0.1:0".parse().unwrap(),
            gateway_address: "127.0.0.1:0".parse().unwrap(),
            child_timeout: Duration::from_millis(200),
            ..Config::default()
        }
    }

    #[test]
    fn test_state_transitions() {
        use MembraneState::*;

        assert!(Initializing.can_transition_to(StartingChild));
        assert!(Initializing.can_transition_to(WaitingForWorkers));
        assert!(WaitingForWorkers.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Initializing));
        assert!(!Initializing.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Stopping));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let membrane = Membrane::builder().config(test_config()).build().unwrap();
        membrane.stop().await;
        assert_eq!(membrane.state(), MembraneState::Stopped);
        assert!(matches!(membrane.start().await, Err(Error::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_missing_services_fail_initialization() {
        let membrane = Membrane::builder()
            .config(test_config())
            .plugins(ServicePlugins::none())
            .build()
            .unwrap();

        let err = membrane.start().await.unwrap_err();
        assert!(matches!(err, Error::MissingServices(ref missing) if missing.len() == 4));
        assert_eq!(membrane.state(), MembraneState::Failed);
    }

    #[tokio::test]
    async fn test_no_worker_times_out() {
        let membrane = Membrane::builder().config(test_config()).build().unwrap();

        let err = membrane.start().await.unwrap_err();
        assert!(matches!(err, Error::Pool(_)));
        assert_eq!(membrane.state(), MembraneState::Failed);
    }

    #[tokio::test]
    async fn test_runs_until_stopped() {
        let pool = Arc::new(WorkerPool::default());
        pool.add_worker(Arc::new(MockWorker::new())).unwrap();

        let membrane = Arc::new(
            Membrane::builder()
                .config(test_config())
                .gateway(Arc::new(HttpGateway::new("127.0.0.1:0".parse().unwrap())))
                .pool(pool)
                .build()
                .unwrap(),
        );

        let mut states = membrane.subscribe();
        let running = Arc::clone(&membrane);
        let handle = tokio::spawn(async move { running.start().await });

        states
            .wait_for(|s| *s == MembraneState::Running)
            .await
            .unwrap();
        assert!(membrane.service_addr().is_some());

        membrane.stop().await;
        handle.await.unwrap().unwrap();
        assert_eq!(membrane.state(), MembraneState::Stopped);
    }

    #[tokio::test]
    async fn test_dead_worker_fails_membrane() {
        let pool = Arc::new(WorkerPool::default());
        let worker = Arc::new(MockWorker::new());
        pool.add_worker(worker.clone()).unwrap();

        let membrane = Arc::new(
            Membrane::builder()
                .config(test_config())
                .gateway(Arc::new(HttpGateway::new("127.0.0.1:0".parse().unwrap())))
                .pool(pool)
                .build()
                .unwrap(),
        );

        let mut states = membrane.subscribe();
        let running = Arc::clone(&membrane);
        let handle = tokio::spawn(async move { running.start().await });
        states
            .wait_for(|s| *s == MembraneState::Running)
            .await
            .unwrap();

        worker.kill();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Pool(_)));
        assert_eq!(membrane.state(), MembraneState::Failed);
    }
}
