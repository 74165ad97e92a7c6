//! Durable JSON key-value storage.
//!
//! The version marker and the preference map are each stored as one JSON document
//! under a fixed key. Any backend that can read, write and delete a document by key
//! qualifies; files (default) and Redis ship here, plus an in-memory store for tests.
//!
//! A missing key is reported as `Ok(None)`, never as an error, so callers can treat
//! "nothing stored yet" as a first run without inspecting I/O error kinds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Storage key of the last-notified version marker.
pub const VERSION_MARKER_KEY: &str = "version_marker";

/// Storage key of the user preference map.
pub const PREFERENCES_KEY: &str = "user_preferences";

#[async_trait]
pub trait JsonStore: Send + Sync {
    /// Read a document. `Ok(None)` when nothing is stored under `key`.
    async fn read(&self, key: &str) -> Result<Option<Value>, AppError>;

    /// Write a document, creating the storage location if needed.
    async fn write(&self, key: &str, value: &Value) -> Result<(), AppError>;

    /// Delete a document. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

/// One pretty-printed JSON file per key under a root directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }
}

#[async_trait]
impl JsonStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, AppError> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            AppError::Storage(format!("failed to create {}: {}", self.root.display(), e))
        })?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(value)?;

        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| AppError::Storage(format!("failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            AppError::Storage(format!("failed to replace {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Documents stored as JSON strings under `{prefix}{key}`.
pub struct RedisStore {
    redis: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl JsonStore for RedisStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, AppError> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(self.redis_key(key)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        let raw = serde_json::to_string(value)?;
        redis.set::<_, _, ()>(self.redis_key(key), raw).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        redis.del::<_, ()>(self.redis_key(key)).await?;
        Ok(())
    }
}

/// Process-local store. Counts writes and can be told to fail them.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Value>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current document under `key`, bypassing the trait.
    pub async fn snapshot(&self, key: &str) -> Option<Value> {
        self.docs.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl JsonStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, AppError> {
        Ok(self.docs.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("write to '{}' rejected", key)));
        }
        self.docs.lock().await.insert(key.to_string(), value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.docs.lock().await.remove(key);
        Ok(())
    }
}
