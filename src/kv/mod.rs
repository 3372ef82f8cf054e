//! Key-value store contract for fast-expiring security state.
//!
//! Four namespaces live behind this trait: the refresh-token whitelist
//! (`refresh:`), the token blacklist (`blacklist:`), principal lockouts
//! (`blocked:`), and rate-limit counters (`ratelimit:`). All of them rely on
//! per-key TTLs, and the whitelist additionally relies on [`take`] being a
//! single atomic primitive: two concurrent takers of the same key must never
//! both observe a value.
//!
//! [`take`]: KeyValueStore::take

use async_trait::async_trait;
use std::time::Duration;

mod memory;
mod redis;

pub use self::memory::MemoryKv;
pub use self::redis::RedisKv;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value store operation timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write a value with a TTL, replacing any previous value and TTL.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Whether a live (unexpired) value exists for the key.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically remove the key and return its value, if it was present.
    ///
    /// This is the serialization point for refresh rotation: of any number of
    /// concurrent callers, exactly one observes `Some`.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically increment a counter, creating it at 1 with no TTL.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Set the TTL on an existing key. A no-op for missing keys.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remaining TTL, or `None` if the key is missing or has no TTL.
    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Delete every key matching a glob pattern, returning how many went.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError>;
}

/// Key builders for the four namespaces.
pub(crate) mod keys {
    /// Whitelist entry marking a refresh token as redeemable exactly once.
    pub(crate) fn refresh_whitelist(principal_id: &str, jti: &str) -> String {
        format!("refresh:{principal_id}:{jti}")
    }

    /// Pattern covering every whitelist entry of one principal.
    pub(crate) fn refresh_family(principal_id: &str) -> String {
        format!("refresh:{principal_id}:*")
    }

    /// Blacklist entry marking a jti as unusable before natural expiry.
    pub(crate) fn blacklist(jti: &str) -> String {
        format!("blacklist:{jti}")
    }

    /// Lockout entry blocking a principal regardless of token validity.
    pub(crate) fn lockout(principal_id: &str) -> String {
        format!("blocked:{principal_id}")
    }

}
