use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::engine::error::EngineError;

/// Expiring key/value storage for job records and cached detections.
///
/// Plain overwrite semantics: no compare-and-swap, last write wins.
#[automock]
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), EngineError>;

    /// Returns `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
}

pub async fn put_json<T>(
    store: &dyn ProgressStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), EngineError>
where
    T: Serialize + Sync,
{
    let raw = serde_json::to_string(value)?;
    store.put(key, raw, ttl).await
}

pub async fn get_json<T>(store: &dyn ProgressStore, key: &str) -> Result<Option<T>, EngineError>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process store. Expired entries are dropped lazily on write.
#[derive(Clone, Default)]
pub struct MemoryProgressStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), EngineError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        debug!(key, ttl_secs = ttl.as_secs(), "stored record");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }
}
