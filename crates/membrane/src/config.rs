// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the membrane.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use membrane_protocol::MembraneServerConfig;

/// How the user function is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembraneMode {
    /// The function attaches itself over a FaaS stream.
    Faas,
    /// The function is an HTTP server at the child address.
    HttpProxy,
}

impl FromStr for MembraneMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FAAS" => Ok(Self::Faas),
            "HTTP_PROXY" => Ok(Self::HttpProxy),
            _ => Err(ConfigError::InvalidValue {
                name: "MEMBRANE_MODE",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for MembraneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Faas => f.write_str("FAAS"),
            Self::HttpProxy => f.write_str("HTTP_PROXY"),
        }
    }
}

/// Trigger surface served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    Http,
    EventGrid,
    PubSub,
    Lambda,
}

impl FromStr for GatewayKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "event-grid" | "eventgrid" => Ok(Self::EventGrid),
            "pubsub" => Ok(Self::PubSub),
            "lambda" => Ok(Self::Lambda),
            _ => Err(ConfigError::InvalidValue {
                name: "MEMBRANE_GATEWAY",
                value: s.to_string(),
            }),
        }
    }
}

/// Backend-service provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProvider {
    /// In-memory implementations of every service.
    Dev,
    /// No services; every facade call is unsupported.
    None,
}

impl FromStr for ServiceProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "none" => Ok(Self::None),
            _ => Err(ConfigError::InvalidValue {
                name: "MEMBRANE_PROVIDER",
                value: s.to_string(),
            }),
        }
    }
}

/// Membrane configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// QUIC listener for service facades and FaaS streams
    pub service_address: SocketAddr,
    /// Address the HTTP_PROXY child listens on
    pub child_address: String,
    /// Gateway HTTP listener
    pub gateway_address: SocketAddr,
    pub mode: MembraneMode,
    pub gateway: GatewayKind,
    pub provider: ServiceProvider,
    /// Startup timeout for the child port and for worker readiness
    pub child_timeout: Duration,
    /// Start even when the provider lacks some services
    pub tolerate_missing_services: bool,
    pub min_workers: usize,
    pub max_workers: usize,
    /// Deadline for a correlated FaaS response
    pub faas_response_timeout: Duration,
    /// `AWS_LAMBDA_RUNTIME_API`, required by the lambda gateway
    pub lambda_runtime_api: Option<String>,
    /// User function command line; empty when nothing is spawned
    pub child_command: Vec<String>,
    /// Transport settings for the service listener; its bind address is
    /// taken from `service_address`
    pub quic: MembraneServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_address: SocketAddr::from(([127, 0, 0, 1], 50051)),
            child_address: "127.0.0.1:8080".to_string(),
            gateway_address: SocketAddr::from(([0, 0, 0, 0], 9001)),
            mode: MembraneMode::Faas,
            gateway: GatewayKind::Http,
            provider: ServiceProvider::Dev,
            child_timeout: Duration::from_secs(10),
            tolerate_missing_services: false,
            min_workers: 1,
            max_workers: 1,
            faas_response_timeout: Duration::from_secs(30),
            lambda_runtime_api: None,
            child_command: Vec::new(),
            quic: MembraneServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let service_address = parse_or(&var, "SERVICE_ADDRESS", defaults.service_address)?;
        let gateway_address = parse_or(&var, "GATEWAY_ADDRESS", defaults.gateway_address)?;
        let child_address = var("CHILD_ADDRESS").unwrap_or(defaults.child_address);
        let mode = parse_or(&var, "MEMBRANE_MODE", defaults.mode)?;
        let gateway = parse_or(&var, "MEMBRANE_GATEWAY", defaults.gateway)?;
        let provider = parse_or(&var, "MEMBRANE_PROVIDER", defaults.provider)?;

        let child_timeout = Duration::from_secs(parse_or(
            &var,
            "CHILD_TIMEOUT_SECONDS",
            defaults.child_timeout.as_secs(),
        )?);
        let faas_response_timeout = Duration::from_millis(parse_or(
            &var,
            "FAAS_RESPONSE_TIMEOUT_MS",
            30_000u64,
        )?);

        let tolerate_missing_services = match var("TOLERATE_MISSING_SERVICES") {
            Some(v) => parse_bool("TOLERATE_MISSING_SERVICES", &v)?,
            None => defaults.tolerate_missing_services,
        };

        let min_workers = parse_or(&var, "MIN_WORKERS", defaults.min_workers)?;
        let max_workers = parse_or(&var, "MAX_WORKERS", defaults.max_workers)?;
        if max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_WORKERS",
                value: "0".to_string(),
            });
        }
        if min_workers > max_workers {
            return Err(ConfigError::WorkerBounds {
                min: min_workers,
                max: max_workers,
            });
        }

        let child_command = var("MEMBRANE_CHILD_COMMAND")
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let quic = MembraneServerConfig {
            bind_addr: service_address,
            max_bi_streams: parse_or(
                &var,
                "MEMBRANE_QUIC_MAX_BI_STREAMS",
                defaults.quic.max_bi_streams,
            )?,
            idle_timeout_ms: parse_or(
                &var,
                "MEMBRANE_QUIC_IDLE_TIMEOUT_MS",
                defaults.quic.idle_timeout_ms,
            )?,
            keep_alive_interval_ms: parse_or(
                &var,
                "MEMBRANE_QUIC_KEEP_ALIVE_MS",
                defaults.quic.keep_alive_interval_ms,
            )?,
            udp_receive_buffer_size: parse_or(
                &var,
                "MEMBRANE_QUIC_UDP_RECV_BUFFER",
                defaults.quic.udp_receive_buffer_size,
            )?,
            udp_send_buffer_size: parse_or(
                &var,
                "MEMBRANE_QUIC_UDP_SEND_BUFFER",
                defaults.quic.udp_send_buffer_size,
            )?,
            ..defaults.quic
        };

        Ok(Self {
            service_address,
            child_address,
            gateway_address,
            mode,
            gateway,
            provider,
            child_timeout,
            tolerate_missing_services,
            min_workers,
            max_workers,
            faas_response_timeout,
            lambda_runtime_api: var("AWS_LAMBDA_RUNTIME_API"),
            child_command,
            quic,
        })
    }

    /// Replace the child command; an empty command keeps the current one.
    pub fn with_child_command(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.child_command = command;
        }
        self
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A variable holds a value that does not parse.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    /// `MIN_WORKERS` exceeds `MAX_WORKERS`.
    #[error("MIN_WORKERS ({min}) must not exceed MAX_WORKERS ({max})")]
    WorkerBounds { min: usize, max: usize },
}
