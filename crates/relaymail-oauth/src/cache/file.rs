//! Token cache persisted as a JSON file.
//!
//! Lets short-lived processes (a CLI invoked per message, a cron job) reuse
//! a token across runs instead of hitting the token endpoint every time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{CacheResult, TokenCache};
use crate::error::CacheError;

/// Directory name under the platform cache directory.
const CACHE_DIR_NAME: &str = "relaymail";

/// Cache region stored in `<dir>/<region>.json`.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    lock: Mutex<()>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

type Region = HashMap<String, StoredEntry>;

impl FileCache {
    /// Creates a cache region stored in `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, region: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{region}.json")),
            lock: Mutex::new(()),
        }
    }

    /// Creates a cache region in the platform cache directory
    /// (e.g. `~/.cache/relaymail` on Linux).
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no cache directory.
    pub fn in_user_cache_dir(region: &str) -> CacheResult<Self> {
        let dir = dirs::cache_dir()
            .ok_or_else(|| CacheError::Backend("no user cache directory".into()))?
            .join(CACHE_DIR_NAME);
        Ok(Self::new(dir, region))
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CacheResult<Region> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Region::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Region::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, region: &Region) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_vec_pretty(region)?;
        let tmp = self.path.with_extension("json.tmp");

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenCache for FileCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let region = self.load().await?;

        Ok(region
            .get(key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        let mut region = self.load().await?;
        let now = Utc::now();

        region.retain(|_, entry| entry.expires_at > now);

        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| CacheError::Backend(format!("TTL out of range: {ttl:?}")))?;
        region.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at,
            },
        );

        self.store(&region).await?;
        debug!(path = %self.path.display(), key, "stored cache entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        let mut region = self.load().await?;
        if region.remove(key).is_some() {
            self.store(&region).await?;
        }
        Ok(())
    }
}
