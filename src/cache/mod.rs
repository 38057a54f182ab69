//! Per-user scoped caching for tracker API reads.
//!
//! Every entry is keyed by `(operation, user_id, base_url)` — including the
//! endpoint means a user who points at a new tracker never sees data cached
//! under the old one. Entries carry invalidation tags (at minimum
//! `{operation}:{user_id}` plus a user-wide tag) so the composition layer
//! can purge everything a credential change could have poisoned, immediately
//! and not lazily.
//!
//! The cache key alone does NOT provide freshness on credential rotation:
//! if the API key changes but the base URL does not, the key is identical.
//! The explicit tag invalidation after a save is load-bearing.
//!
//! Store outages degrade to a direct fetch with a warning; the cache never
//! blocks reads. Concurrent misses on the same key may each run the fetch
//! once — accepted, per-user concurrency is low.

use crate::store::KeyValueStore;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Serialized cache entry: the value plus its expiry and tags.
#[derive(Serialize, Deserialize)]
struct CacheEntry {
    value: serde_json::Value,
    /// Unix milliseconds; checked logically in addition to the store TTL
    expires_at: i64,
    tags: Vec<String>,
}

/// Tag shared by all of one user's entries for one operation.
pub fn operation_tag(operation: &str, user_id: &str) -> String {
    format!("{}:{}", operation, user_id)
}

/// Tag shared by all of one user's entries, across operations.
pub fn user_tag(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Cache over the key-value store with time-based expiry and tag-based
/// invalidation.
pub struct ScopedCache {
    store: Arc<dyn KeyValueStore>,
}

impl ScopedCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn entry_key(cache_key: &str, user_id: &str, base_url: &str) -> String {
        format!("cache:{}:{}:{}", cache_key, user_id, base_url)
    }

    fn tag_key(tag: &str) -> String {
        format!("cachetag:{}", tag)
    }

    /// Returns the cached value for `(cache_key, user_id, base_url)` if live,
    /// otherwise runs `fetch`, stores its result, and returns it.
    ///
    /// `operation` groups entries for tag invalidation; `cache_key`
    /// additionally distinguishes variants of one operation (for example
    /// one entry per requested week) that must all fall together when the
    /// operation is invalidated. For unparameterized operations the two are
    /// the same string.
    ///
    /// Nothing is written unless the fetch succeeds, so an abandoned or
    /// failed fetch can never leave a partial entry behind.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        operation: &str,
        cache_key: &str,
        user_id: &str,
        base_url: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = Self::entry_key(cache_key, user_id, base_url);

        match self.store.get(&key).await {
            Ok(Some(raw)) => {
                if let Some(value) = Self::live_value::<T>(&raw) {
                    debug!(operation = %operation, user_id = %user_id, "Cache hit");
                    return Ok(value);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    error = %e,
                    operation = %operation,
                    "Cache store unreachable, fetching directly"
                );
            }
        }

        let value = fetch().await?;
        self.write(operation, user_id, &key, &value, ttl).await;
        Ok(value)
    }

    /// Purges all entries carrying `tag`, immediately.
    pub async fn invalidate_tag(&self, tag: &str) {
        let tag_key = Self::tag_key(tag);

        let keys = match self.store.smembers(&tag_key).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, tag = %tag, "Failed to read tag index for invalidation");
                return;
            }
        };

        for key in &keys {
            if let Err(e) = self.store.del(key).await {
                warn!(error = %e, key = %key, "Failed to purge cache entry");
            }
        }
        if let Err(e) = self.store.del(&tag_key).await {
            warn!(error = %e, tag = %tag, "Failed to drop tag index");
        }

        debug!(tag = %tag, purged = keys.len(), "Cache tag invalidated");
    }

    /// Purges every cached entry for one user, across all operations.
    /// Called whenever the user's credential record changes.
    pub async fn invalidate_user(&self, user_id: &str) {
        self.invalidate_tag(&user_tag(user_id)).await;
    }

    fn live_value<T: DeserializeOwned>(raw: &str) -> Option<T> {
        let entry: CacheEntry = serde_json::from_str(raw).ok()?;
        if entry.expires_at <= Utc::now().timestamp_millis() {
            return None;
        }
        serde_json::from_value(entry.value).ok()
    }

    async fn write<T: Serialize>(
        &self,
        operation: &str,
        user_id: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        let tags = vec![operation_tag(operation, user_id), user_tag(user_id)];

        let entry = CacheEntry {
            value: match serde_json::to_value(value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, operation = %operation, "Failed to serialize cache value");
                    return;
                }
            },
            expires_at: Utc::now().timestamp_millis() + ttl.as_millis() as i64,
            tags: tags.clone(),
        };

        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, operation = %operation, "Failed to serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.store.set_ex(key, &raw, ttl).await {
            warn!(error = %e, operation = %operation, "Failed to write cache entry");
            return;
        }
        for tag in &tags {
            if let Err(e) = self.store.sadd(&Self::tag_key(tag), key).await {
                warn!(error = %e, tag = %tag, "Failed to index cache entry under tag");
            }
        }
    }
}
