// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Membrane - sidecar runtime
//!
//! Usage: `membrane [child command...]`
//!
//! Serves the configured gateway and the service listener, launches the
//! child command (if any), and runs until SIGINT/SIGTERM or a fatal error.
//! Exits non-zero on failure.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

use membrane::{Config, Membrane};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "membrane=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!(error = %e, "no .env file loaded");
    }

    let config = Config::from_env()?.with_child_command(std::env::args().skip(1).collect());

    info!(
        mode = %config.mode,
        gateway = ?config.gateway,
        service_address = %config.service_address,
        gateway_address = %config.gateway_address,
        child = ?config.child_command,
        "Starting membrane"
    );

    let membrane = Arc::new(Membrane::builder().config(config).build()?);

    let stopper = Arc::clone(&membrane);
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                info!("Shutdown signal received");
                stopper.stop().await;
            }
            Err(e) => error!(error = %e, "failed to listen for shutdown signals"),
        }
    });

    membrane.start().await?;

    info!("Membrane shut down");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}
