// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend-service facades.
//!
//! User code reaches key-value, storage, queue and secret backends through the
//! membrane. Each backend is a trait implemented by a provider plugin; the
//! membrane itself only routes facade calls to whichever plugins the provider
//! supplies. A provider that lacks a service simply leaves it out of
//! [`ServicePlugins`] and calls to that facade fail with `UNIMPLEMENTED`.

pub mod dev;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use dev::DevServices;
pub use server::handle_service_request;

/// Errors returned by service plugins.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServiceError {
    /// The addressed item does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The call was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The provider has no plugin for this service.
    #[error("{service} is not supported on this provider")]
    Unsupported {
        /// Service name (e.g. "queue")
        service: &'static str,
    },

    /// The backend failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl ServiceError {
    /// Status code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ServiceError::Unsupported { .. } => "UNIMPLEMENTED",
            ServiceError::Backend(_) => "INTERNAL",
        }
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// What a pre-signed URL allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A queue task leased to a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedTask {
    pub lease_id: String,
    pub payload: Vec<u8>,
}

/// A stored secret version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVersion {
    pub name: String,
    pub version: String,
}

/// Secret contents at a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretValue {
    pub version: String,
    pub value: Vec<u8>,
}

/// Key-value documents grouped by store.
#[async_trait]
pub trait KeyValueService: Send + Sync {
    /// `None` when the key does not exist.
    async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, store: &str, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, store: &str, key: &str) -> Result<()>;
}

/// Blob storage grouped by bucket.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn write(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
    /// Keys in `bucket` starting with `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
    async fn pre_sign_url(
        &self,
        bucket: &str,
        key: &str,
        mode: AccessMode,
        expiry: Duration,
    ) -> Result<String>;
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;
}

/// At-least-once task queues.
///
/// Received tasks are leased; a lease that is never completed makes the task
/// available again according to the backend's own policy.
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn send(&self, queue: &str, payloads: Vec<Vec<u8>>) -> Result<()>;
    async fn receive(&self, queue: &str, depth: usize) -> Result<Vec<LeasedTask>>;
    async fn complete(&self, queue: &str, lease_id: &str) -> Result<()>;
}

/// Versioned secrets.
#[async_trait]
pub trait SecretService: Send + Sync {
    async fn put(&self, name: &str, value: Vec<u8>) -> Result<SecretVersion>;
    /// `version` may be `latest`.
    async fn access(&self, name: &str, version: &str) -> Result<SecretValue>;
}

pub const KEY_VALUE: &str = "key-value";
pub const STORAGE: &str = "storage";
pub const QUEUE: &str = "queue";
pub const SECRETS: &str = "secrets";

/// The service plugins supplied by the active provider.
#[derive(Clone, Default)]
pub struct ServicePlugins {
    key_value: Option<Arc<dyn KeyValueService>>,
    storage: Option<Arc<dyn StorageService>>,
    queue: Option<Arc<dyn QueueService>>,
    secrets: Option<Arc<dyn SecretService>>,
}

impl ServicePlugins {
    /// No plugins at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every service backed by one in-memory [`DevServices`] instance.
    pub fn dev() -> Self {
        let dev = Arc::new(DevServices::new());
        Self::none()
            .with_key_value(dev.clone())
            .with_storage(dev.clone())
            .with_queue(dev.clone())
            .with_secrets(dev)
    }

    pub fn with_key_value(mut self, plugin: Arc<dyn KeyValueService>) -> Self {
        self.key_value = Some(plugin);
        self
    }

    pub fn with_storage(mut self, plugin: Arc<dyn StorageService>) -> Self {
        self.storage = Some(plugin);
        self
    }

    pub fn with_queue(mut self, plugin: Arc<dyn QueueService>) -> Self {
        self.queue = Some(plugin);
        self
    }

    pub fn with_secrets(mut self, plugin: Arc<dyn SecretService>) -> Self {
        self.secrets = Some(plugin);
        self
    }

    pub fn key_value(&self) -> Result<&Arc<dyn KeyValueService>> {
        self.key_value
            .as_ref()
            .ok_or(ServiceError::Unsupported { service: KEY_VALUE })
    }

    pub fn storage(&self) -> Result<&Arc<dyn StorageService>> {
        self.storage
            .as_ref()
            .ok_or(ServiceError::Unsupported { service: STORAGE })
    }

    pub fn queue(&self) -> Result<&Arc<dyn QueueService>> {
        self.queue
            .as_ref()
            .ok_or(ServiceError::Unsupported { service: QUEUE })
    }

    pub fn secrets(&self) -> Result<&Arc<dyn SecretService>> {
        self.secrets
            .as_ref()
            .ok_or(ServiceError::Unsupported { service: SECRETS })
    }

    /// Names of the services without a plugin.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (KEY_VALUE, self.key_value.is_none()),
            (STORAGE, self.storage.is_none()),
            (QUEUE, self.queue.is_none()),
            (SECRETS, self.secrets.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect()
    }
}

impl std::fmt::Debug for ServicePlugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePlugins")
            .field("key_value", &self.key_value.is_some())
            .field("storage", &self.storage.is_some())
            .field("queue", &self.queue.is_some())
            .field("secrets", &self.secrets.is_some())
            .finish()
    }
}
