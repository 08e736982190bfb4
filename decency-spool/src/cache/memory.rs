use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    cache::{CacheStore, now_unix},
    error::CacheError,
};

#[derive(Debug, Clone)]
struct Stored {
    expires_at: u64,
    data: Vec<u8>,
}

/// In-process cache backend.
///
/// Adequate when Policy, content filter and log parser run inside one
/// process (and for tests); multi-process deployments use [`FileCache`]
/// or a network cache behind the same trait.
///
/// [`FileCache`]: crate::cache::FileCache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Stored>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let expired = match self.entries.get(key) {
            Some(stored) if now_unix() > stored.expires_at => true,
            Some(stored) => return Ok(Some(stored.data.clone())),
            None => return Ok(None),
        };

        // Passive expiry: drop the stale entry on the read path.
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Stored {
                expires_at: now_unix() + ttl.as_secs(),
                data: value,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}
