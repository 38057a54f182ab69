//! In-process key-value store backed by a concurrent map.
//!
//! Implements the same observable semantics as an external store (TTLs,
//! atomic increment, sets) for single-node deployments and tests. Per-key
//! atomicity comes from the map's entry API; expiry is enforced lazily on
//! access.

use super::{KeyValueStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    Int(i64),
    Set(HashSet<String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// DashMap-backed store. State is in-memory only (resets on restart).
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the entry if expired, returning the live entry otherwise.
    fn live(&self, key: &str) -> Option<Entry> {
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired() {
            drop(self.entries.remove(key));
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live(key).and_then(|e| match e.value {
            Value::Str(s) => Some(s),
            Value::Int(i) => Some(i.to_string()),
            Value::Set(_) => None,
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Int(0),
            expires_at: None,
        });

        // A previously expired counter restarts from zero
        if entry.is_expired() {
            entry.value = Value::Int(0);
            entry.expires_at = None;
        }

        let next = match entry.value {
            Value::Int(i) => i + 1,
            // Counter keys are only ever used as integers
            _ => 1,
        };
        entry.value = Value::Int(next);
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        Ok(self
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live(key).is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });

        if entry.is_expired() {
            entry.value = Value::Set(HashSet::new());
            entry.expires_at = None;
        }

        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
            }
            other => {
                *other = Value::Set(HashSet::from([member.to_string()]));
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .live(key)
            .map(|e| match e.value {
                Value::Set(set) => set.into_iter().collect(),
                _ => vec![],
            })
            .unwrap_or_default())
    }
}
