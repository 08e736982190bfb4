use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{
    cache::{CacheStore, now_unix},
    error::CacheError,
};

#[derive(Debug, Serialize, Deserialize)]
struct Stored {
    expires_at: u64,
    data: Vec<u8>,
}

/// File-backed cache: one file per key in a shared directory.
///
/// Writes go to a temporary file first and are renamed into place, which
/// is what makes a single-key write atomic across the worker processes
/// and the sibling daemons sharing the directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// # Errors
    /// If the cache directory cannot be created.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are `QUEUE-<token>` / `USER-<address>`; mapping the odd
        // character to `_` keeps names portable without an index file.
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(name)
    }
}

#[async_trait]
impl CacheStore for FileCache {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let (stored, _): (Stored, _) =
            bincode::serde::decode_from_slice(&raw, bincode::config::standard())?;

        if now_unix() > stored.expires_at {
            // Passive expiry; racing removers are harmless.
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(stored.data))
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let stored = Stored {
            expires_at: now_unix() + ttl.as_secs(),
            data: value,
        };
        let raw = bincode::serde::encode_to_vec(&stored, bincode::config::standard())?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".tmp-{}", Ulid::new()));
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
