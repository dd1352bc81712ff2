//! Token cache collaborators.
//!
//! The token provider keeps no expiry of its own: an entry is trusted for as
//! long as the cache reports it present, so every backend must drop entries
//! once their TTL has elapsed.

mod file;
mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// Region used by the default token caches.
pub const TOKEN_CACHE_REGION: &str = "relaymail_token_cache";

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Key-value cache with per-entry TTL.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Removes the entry under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn remove(&self, key: &str) -> CacheResult<()>;
}
