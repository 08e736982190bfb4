//! Shared key/value cache keyed by the MTA's queue identifier.
//!
//! The Policy server, the content filter workers and the log parser all
//! read and write the same entries, so the backend contract is: per-key
//! atomic replacement, no read-modify-write, passive TTL expiry.

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::CacheError;

mod entry;
mod file;
mod memory;

pub use entry::QueueEntry;
pub use file::FileCache;
pub use memory::MemoryCache;

/// Entries live this long unless rewritten; every write refreshes it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Backend contract for the shared cache.
#[async_trait]
pub trait CacheStore: Debug + Send + Sync {
    /// Fetch the raw value under `key`, or `None` if absent or expired.
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Replace the value under `key` wholesale and reset its lifetime.
    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Typed view over a [`CacheStore`], serializing values with bincode.
#[derive(Debug, Clone)]
pub struct QueueCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl QueueCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_TTL,
        }
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// # Errors
    /// On backend failure or if the stored bytes do not decode as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.store.get_raw(key).await? else {
            return Ok(None);
        };

        let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())?;
        Ok(Some(value))
    }

    /// # Errors
    /// On backend failure or if `value` cannot be encoded.
    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let raw = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
        self.store.set_raw(key, raw, self.ttl).await
    }

    /// Rewrite an entry as-is to push its expiry out; returns whether the
    /// entry still existed.
    ///
    /// # Errors
    /// On backend failure.
    pub async fn touch(&self, key: &str) -> Result<bool, CacheError> {
        match self.store.get_raw(key).await? {
            Some(raw) => {
                self.store.set_raw(key, raw, self.ttl).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// # Errors
    /// On backend failure.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key).await
    }
}

pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn typed_roundtrip_via_memory_backend() {
        let cache = QueueCache::new(Arc::new(MemoryCache::new()));

        let entry = QueueEntry {
            queue_id: "9C38A1F".to_string(),
            score: -42.5,
            details: vec!["test: -42.5".to_string()],
            ..QueueEntry::default()
        };

        cache.set(&QueueEntry::key("9C38A1F"), &entry).await.unwrap();
        let read_back: Option<QueueEntry> = cache.get(&QueueEntry::key("9C38A1F")).await.unwrap();
        assert_eq!(read_back, Some(entry));
    }

    #[tokio::test]
    async fn touch_reports_absence() {
        let cache = QueueCache::new(Arc::new(MemoryCache::new()));
        assert!(!cache.touch("QUEUE-MISSING").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let cache =
            QueueCache::new(Arc::new(MemoryCache::new())).with_ttl(Duration::from_secs(0));

        cache.set("QUEUE-X", &1_u32).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get::<u32>("QUEUE-X").await.unwrap(), None);
    }
}
