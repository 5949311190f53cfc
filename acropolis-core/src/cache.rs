//! Content-addressed storage for raw weather service responses.
//!
//! A [`CacheKey`] is a SHA-256 digest over the resource name, query type,
//! collection and every request parameter, so logically identical requests
//! share an entry and requests differing in any parameter never collide.
//! Entries never expire: a forecast for a fixed request is immutable.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache entry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: String,
    query_type: String,
    digest: String,
}

impl CacheKey {
    pub fn new(
        resource: &str,
        query_type: &str,
        collection: &str,
        params: &BTreeMap<String, String>,
    ) -> Self {
        // BTreeMap keeps the encoding independent of insertion order
        let canonical = serde_json::json!({
            "resource": resource,
            "query_type": query_type,
            "collection": collection,
            "params": params,
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());

        Self {
            resource: resource.to_string(),
            query_type: query_type.to_string(),
            digest: hex::encode(hasher.finalize()),
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Relative location of the entry: `<resource>/<query_type>/<digest>.json`
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(sanitize(&self.resource))
            .join(sanitize(&self.query_type))
            .join(format!("{}.json", self.digest))
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError>;
    async fn put(&self, key: &CacheKey, payload: &Value) -> Result<(), CacheError>;
}

/// Cache persisted under a directory so it survives restarts.
#[derive(Debug, Clone)]
pub struct FileCache {
    directory: PathBuf,
}

impl FileCache {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(key.relative_path())
    }
}

#[async_trait]
impl ResponseCache for FileCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        let path = self.entry_path(key);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let payload = serde_json::from_slice(&content)?;
        debug!(path = %path.display(), "Loaded response from cache");
        Ok(Some(payload))
    }

    async fn put(&self, key: &CacheKey, payload: &Value) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a unique temp file and rename so racing writers never tear an entry
        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec(payload)?;
        if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), "Saved response to cache");
        Ok(())
    }
}

/// Process-local cache, mostly useful in tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, payload: &Value) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.clone(), payload.clone());
        Ok(())
    }
}
