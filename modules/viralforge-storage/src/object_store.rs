use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, TimeZone, Utc};

use viralforge_common::error::{ForgeError, Result};

/// One listed object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Cloud object storage for migrated render outputs. Keys are flat
/// (file basenames).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;
    async fn list(&self) -> Result<Vec<StoredObject>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Pre-signed GET URL, valid for `ttl`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String>;
}

// --- S3 (and S3-compatible endpoints) ---

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    /// Build a client from ambient AWS config, honoring a custom
    /// endpoint (MinIO, OCI, R2).
    pub async fn connect(bucket: &str, region: &str, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| ForgeError::Transient(format!("read {}: {e}", path.display())))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| ForgeError::Transient(format!("s3 put {key}: {e}")))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| ForgeError::Transient(format!("s3 list: {e}")))?;
            for object in page.contents() {
                let key = match object.key() {
                    Some(key) => key.to_string(),
                    None => continue,
                };
                let last_modified = object
                    .last_modified()
                    .map(|t| {
                        Utc.timestamp_opt(t.secs(), t.subsec_nanos())
                            .single()
                            .unwrap_or_else(Utc::now)
                    })
                    .unwrap_or_else(Utc::now);
                objects.push(StoredObject {
                    key,
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified,
                });
            }
        }
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ForgeError::Transient(format!("s3 delete {key}: {e}")))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| ForgeError::Validation(format!("presign ttl: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| ForgeError::Transient(format!("s3 presign {key}: {e}")))?;
        Ok(presigned.uri().to_string())
    }
}

// --- In-memory ---

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    /// Test hook: backdate an object for retention scenarios.
    pub fn set_last_modified(&self, key: &str, at: DateTime<Utc>) {
        if let Some(object) = self.objects.lock().unwrap().get_mut(key) {
            object.last_modified = at;
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| ForgeError::Transient(format!("read {}: {e}", path.display())))?
            .len();
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                key: key.to_string(),
                size,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredObject>> {
        Ok(self.objects.lock().unwrap().values().cloned().collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        if !self.contains(key) {
            return Err(ForgeError::Validation(format!("unknown object {key}")));
        }
        Ok(format!(
            "https://objects.local/{key}?expires={}",
            ttl.as_secs()
        ))
    }
}
