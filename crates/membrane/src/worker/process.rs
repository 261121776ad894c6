// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Child process supervision and the process-launching worker.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use super::http::HttpWorker;
use super::{Result, Worker, WorkerError};
use crate::trigger::{Event, HttpRequest, HttpResponse};

/// Time a child gets to exit after SIGTERM before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// A spawned user function process.
///
/// Stdio is inherited from the membrane. A background task waits on the
/// process and publishes its exit status; dropping the handle kills the child.
pub struct ChildProcess {
    pid: Option<u32>,
    exit: watch::Receiver<Option<String>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    grace: Duration,
}

impl ChildProcess {
    /// Spawn `command` (program followed by its arguments).
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| WorkerError::InvalidRequest("empty child command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let pid = child.id();
        info!(pid = ?pid, program = %program, "started child process");

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill child process");
                    }
                    child.wait().await
                }
            };

            let description = match status {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {e}"),
            };
            info!(status = %description, "child process exited");
            let _ = exit_tx.send(Some(description));
        });

        Ok(Self {
            pid,
            exit: exit_rx,
            kill: Mutex::new(Some(kill_tx)),
            grace: DEFAULT_STOP_GRACE,
        })
    }

    /// Override the SIGTERM grace period used by [`stop`](Self::stop).
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait for the process to exit and describe its exit status.
    pub async fn wait(&self) -> String {
        let mut exit = self.exit.clone();
        match exit.wait_for(Option::is_some).await {
            Ok(status) => status.clone().unwrap_or_default(),
            Err(_) => "supervisor stopped".to_string(),
        }
    }

    /// SIGTERM the process, then kill it if it outlives the grace period.
    pub async fn stop(&self) {
        if self.has_exited() {
            return;
        }

        if let Some(pid) = self.pid
            && let Ok(raw) = i32::try_from(pid)
            && let Err(e) = signal::kill(Pid::from_raw(raw), Signal::SIGTERM)
        {
            warn!(pid, error = %e, "failed to send SIGTERM to child process");
        }

        if tokio::time::timeout(self.grace, self.wait()).await.is_err() {
            warn!(pid = ?self.pid, "child process ignored SIGTERM, killing");
            self.force_kill();
            self.wait().await;
        }
    }

    fn force_kill(&self) {
        let sender = self
            .kill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

/// Worker that launches the function and then talks HTTP to it.
pub struct ProcessWorker {
    child: Arc<ChildProcess>,
    http: HttpWorker,
}

impl ProcessWorker {
    /// Spawn `command` and wait up to `timeout` for it to listen on `address`.
    ///
    /// Fails if the port never opens or the process exits first; the child is
    /// stopped in both cases.
    pub async fn start(command: &[String], address: &str, timeout: Duration) -> Result<Self> {
        let child = Arc::new(ChildProcess::spawn(command)?);
        Self::attach(child, address, timeout).await
    }

    /// Like [`start`](Self::start) for an already spawned child.
    pub async fn attach(child: Arc<ChildProcess>, address: &str, timeout: Duration) -> Result<Self> {
        let ready = tokio::select! {
            worker = HttpWorker::connect(address, timeout) => worker,
            status = child.wait() => Err(WorkerError::ProcessExited(status)),
        };

        match ready {
            Ok(http) => Ok(Self { child, http }),
            Err(e) => {
                child.stop().await;
                Err(e)
            }
        }
    }

    pub fn child(&self) -> &Arc<ChildProcess> {
        &self.child
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    fn worker_type(&self) -> &'static str {
        "process"
    }

    async fn handle_http_request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.http.handle_http_request(request).await
    }

    async fn handle_event(&self, event: &Event) -> Result<()> {
        self.http.handle_event(event).await
    }

    fn is_alive(&self) -> bool {
        !self.child.has_exited()
    }
}
