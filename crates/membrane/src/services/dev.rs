// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory provider for local development.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccessMode, KeyValueService, LeasedTask, QueueService, Result, SecretService, SecretValue,
    SecretVersion, ServiceError, StorageService,
};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    leased: HashMap<String, Vec<u8>>,
}

/// Every backend service kept in process memory.
///
/// Nothing is persisted; state lives as long as the instance.
#[derive(Default)]
pub struct DevServices {
    documents: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    buckets: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    queues: Mutex<HashMap<String, QueueState>>,
    secrets: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl DevServices {
    pub fn new() -> Self {
        Self::default()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ServiceError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(())
}

#[async_trait]
impl KeyValueService for DevServices {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>> {
        require("store", store)?;
        require("key", key)?;
        Ok(self
            .documents
            .lock()
            .await
            .get(store)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn set(&self, store: &str, key: &str, value: Vec<u8>) -> Result<()> {
        require("store", store)?;
        require("key", key)?;
        self.documents
            .lock()
            .await
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, store: &str, key: &str) -> Result<()> {
        require("store", store)?;
        require("key", key)?;
        if let Some(docs) = self.documents.lock().await.get_mut(store) {
            docs.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageService for DevServices {
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        require("bucket", bucket)?;
        self.buckets
            .lock()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("object {bucket}/{key}")))
    }

    async fn write(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        require("bucket", bucket)?;
        require("key", key)?;
        self.buckets
            .lock()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        require("bucket", bucket)?;
        if let Some(objects) = self.buckets.lock().await.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        require("bucket", bucket)?;
        Ok(self
            .buckets
            .lock()
            .await
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn pre_sign_url(
        &self,
        bucket: &str,
        key: &str,
        mode: AccessMode,
        expiry: Duration,
    ) -> Result<String> {
        require("bucket", bucket)?;
        require("key", key)?;
        let mode = match mode {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        };
        Ok(format!(
            "dev://{bucket}/{key}?mode={mode}&expiry={}",
            expiry.as_secs()
        ))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        require("bucket", bucket)?;
        Ok(self
            .buckets
            .lock()
            .await
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key)))
    }
}

#[async_trait]
impl QueueService for DevServices {
    async fn send(&self, queue: &str, payloads: Vec<Vec<u8>>) -> Result<()> {
        require("queue", queue)?;
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .ready
            .extend(payloads);
        Ok(())
    }

    async fn receive(&self, queue: &str, depth: usize) -> Result<Vec<LeasedTask>> {
        require("queue", queue)?;
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut tasks = Vec::new();
        while tasks.len() < depth.max(1) {
            let Some(payload) = state.ready.pop_front() else {
                break;
            };
            let lease_id = Uuid::new_v4().to_string();
            state.leased.insert(lease_id.clone(), payload.clone());
            tasks.push(LeasedTask { lease_id, payload });
        }
        Ok(tasks)
    }

    async fn complete(&self, queue: &str, lease_id: &str) -> Result<()> {
        require("queue", queue)?;
        self.queues
            .lock()
            .await
            .get_mut(queue)
            .and_then(|state| state.leased.remove(lease_id))
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("lease {lease_id}")))
    }
}

#[async_trait]
impl SecretService for DevServices {
    async fn put(&self, name: &str, value: Vec<u8>) -> Result<SecretVersion> {
        require("name", name)?;
        let mut secrets = self.secrets.lock().await;
        let versions = secrets.entry(name.to_string()).or_default();
        versions.push(value);
        Ok(SecretVersion {
            name: name.to_string(),
            version: versions.len().to_string(),
        })
    }

    async fn access(&self, name: &str, version: &str) -> Result<SecretValue> {
        require("name", name)?;
        let secrets = self.secrets.lock().await;
        let versions = secrets
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(format!("secret {name}")))?;

        let index = match version {
            "" | "latest" => versions.len(),
            v => v
                .parse::<usize>()
                .map_err(|_| ServiceError::InvalidArgument(format!("invalid version {v}")))?,
        };
        let value = index
            .checked_sub(1)
            .and_then(|i| versions.get(i))
            .ok_or_else(|| ServiceError::NotFound(format!("secret {name} version {version}")))?;

        Ok(SecretValue {
            version: index.to_string(),
            value: value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_value_round_trip() {
        let dev = DevServices::new();
        assert_eq!(KeyValueService::get(&dev, "users", "1").await.unwrap(), None);

        dev.set("users", "1", b"ada".to_vec()).await.unwrap();
        assert_eq!(
            KeyValueService::get(&dev, "users", "1").await.unwrap(),
            Some(b"ada".to_vec())
        );

        KeyValueService::delete(&dev, "users", "1").await.unwrap();
        assert_eq!(KeyValueService::get(&dev, "users", "1").await.unwrap(), None);
        assert!(matches!(
            dev.set("", "1", Vec::new()).await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_storage_listing_and_presign() {
        let dev = DevServices::new();
        dev.write("files", "a/1", b"one".to_vec()).await.unwrap();
        dev.write("files", "a/2", b"two".to_vec()).await.unwrap();
        dev.write("files", "b/1", b"three".to_vec()).await.unwrap();

        assert_eq!(dev.list("files", "a/").await.unwrap(), vec!["a/1", "a/2"]);
        assert!(dev.exists("files", "b/1").await.unwrap());
        assert!(!dev.exists("files", "b/2").await.unwrap());
        assert!(matches!(
            dev.read("files", "missing").await,
            Err(ServiceError::NotFound(_))
        ));

        let url = dev
            .pre_sign_url("files", "a/1", AccessMode::Write, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url, "dev://files/a/1?mode=write&expiry=60");
    }

    #[tokio::test]
    async fn test_queue_leases() {
        let dev = DevServices::new();
        dev.send("jobs", vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()])
            .await
            .unwrap();

        let first = dev.receive("jobs", 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].payload, b"1");

        let rest = dev.receive("jobs", 0).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(dev.receive("jobs", 5).await.unwrap().is_empty());

        dev.complete("jobs", &first[0].lease_id).await.unwrap();
        assert!(matches!(
            dev.complete("jobs", &first[0].lease_id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_secret_versions() {
        let dev = DevServices::new();
        let v1 = dev.put("api-key", b"old".to_vec()).await.unwrap();
        let v2 = dev.put("api-key", b"new".to_vec()).await.unwrap();
        assert_eq!(v1.version, "1");
        assert_eq!(v2.version, "2");

        let latest = dev.access("api-key", "latest").await.unwrap();
        assert_eq!(latest.value, b"new");
        assert_eq!(latest.version, "2");
        assert_eq!(dev.access("api-key", "1").await.unwrap().value, b"old");

        assert!(matches!(
            dev.access("api-key", "3").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            dev.access("other", "latest").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
