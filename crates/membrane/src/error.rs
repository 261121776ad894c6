// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the membrane.

use thiserror::Error;

use crate::membrane::MembraneState;

/// Membrane errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The provider lacks services and missing services are not tolerated.
    #[error("Missing services: {}", .0.join(", "))]
    MissingServices(Vec<&'static str>),

    /// Worker construction or execution failed.
    #[error("Worker error: {0}")]
    Worker(#[from] crate::worker::WorkerError),

    /// Worker pool readiness or supervision failed.
    #[error("Worker pool error: {0}")]
    Pool(#[from] crate::pool::PoolError),

    /// Gateway failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    /// Service listener failed.
    #[error("Service listener error: {0}")]
    Server(#[from] membrane_protocol::ServerError),

    /// The child process exited while the membrane was running.
    #[error("Child process exited: {0}")]
    ChildExited(String),

    /// `start` was called more than once.
    #[error("Membrane already started")]
    AlreadyStarted,

    /// A state change not allowed by the lifecycle.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: MembraneState,
        to: MembraneState,
    },

    /// A background task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using membrane Error.
pub type Result<T> = std::result::Result<T, Error>;
