//! Object storage collaborator for published videos.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Result, TutorError};

/// Options for a single upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// MIME type recorded with the object.
    pub content_type: String,
    /// Replace an existing object at the same path.
    pub overwrite: bool,
}

impl UploadOptions {
    /// MP4 video, overwrite allowed.
    pub fn mp4() -> Self {
        Self {
            content_type: "video/mp4".to_string(),
            overwrite: true,
        }
    }
}

/// A listed object.
///
/// `created_at` is kept as the backend reported it; entries whose timestamp
/// is missing or unparseable are never selected for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Object name within the bucket.
    pub name: String,
    /// Creation timestamp as reported by the backend.
    #[serde(default)]
    pub created_at: Option<String>,
}

impl StoredObject {
    /// Parses `created_at` as an RFC 3339 timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Bucketed blob storage with public URLs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` at `path` in `bucket`.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<()>;

    /// Public URL of an object. Does not check existence.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Every object in `bucket`.
    async fn list(&self, bucket: &str) -> Result<Vec<StoredObject>>;

    /// Removes the named objects in one call.
    async fn remove(&self, bucket: &str, names: &[String]) -> Result<()>;
}

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Vec<u8>,
    content_type: String,
    created_at: DateTime<Utc>,
}

/// Process-local object storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: Mutex<HashMap<String, BTreeMap<String, MemoryObject>>>,
}

impl MemoryStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Places an object with an explicit creation time.
    pub async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        bytes: Vec<u8>,
        created_at: DateTime<Utc>,
    ) {
        self.buckets
            .lock()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(
                name.to_string(),
                MemoryObject {
                    bytes,
                    content_type: "application/octet-stream".to_string(),
                    created_at,
                },
            );
    }

    /// Bytes and content type of an object, if present.
    pub async fn object(&self, bucket: &str, name: &str) -> Option<(Vec<u8>, String)> {
        self.buckets
            .lock()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(name))
            .map(|object| (object.bytes.clone(), object.content_type.clone()))
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<()> {
        let mut buckets = self.buckets.lock().await;
        let objects = buckets.entry(bucket.to_string()).or_default();
        if !options.overwrite && objects.contains_key(path) {
            return Err(TutorError::storage(format!(
                "object '{path}' already exists in bucket '{bucket}'"
            )));
        }
        objects.insert(
            path.to_string(),
            MemoryObject {
                bytes,
                content_type: options.content_type.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }

    async fn list(&self, bucket: &str) -> Result<Vec<StoredObject>> {
        Ok(self
            .buckets
            .lock()
            .await
            .get(bucket)
            .map(|objects| {
                objects
                    .iter()
                    .map(|(name, object)| StoredObject {
                        name: name.clone(),
                        created_at: Some(
                            object.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                        ),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<()> {
        if let Some(objects) = self.buckets.lock().await.get_mut(bucket) {
            for name in names {
                objects.remove(name);
            }
        }
        Ok(())
    }
}
