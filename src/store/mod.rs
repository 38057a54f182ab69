// Key-value store abstraction for rate-limit counters and cache entries.
//
// The contract mirrors the handful of primitives the counters and cache
// actually need: TTL'd strings, atomic increment, and plain string sets for
// the cache tag index. Errors are surfaced (not panicked) so callers can
// choose their own degradation policy — the rate limiter fails open, the
// cache falls back to a direct fetch.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;

/// Error talking to the underlying key-value store.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key-value store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Minimal key-value store surface shared by the rate limiter and the cache.
///
/// Single-key operations must be atomic; no cross-key transactions are
/// required. Implementations are expected to expire keys on their own once
/// a TTL elapses.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a string value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a string value with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment an integer key, creating it at 1 if absent.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Attach a time-to-live to an existing key. No-op if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remaining time-to-live, or `None` if the key is absent or unexpiring.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Whether a live (unexpired) key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete a key. Deleting an absent key is success.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Add a member to a string set, creating the set if absent.
    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// All members of a string set; empty if the key is absent.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
}
