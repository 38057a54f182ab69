//! Credential-gated access to the tracker API.
//!
//! Composition point between identity, the vault, the cache, and the tracker
//! client. Per call: resolve identity (fail closed if absent), resolve the
//! decrypted credential, then run the operation through the scoped cache
//! with a closure that captures only the base URL and the decrypted key.
//!
//! Decryption failure triggers the vault's self-heal and is surfaced as a
//! distinguished outcome so the UI can explain what happened instead of
//! showing a generic error.

use crate::cache::{operation_tag, ScopedCache};
use crate::credentials::{CredentialRecord, CredentialVault, VaultError};
use crate::tracker::{TrackerClient, TrackerError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Gateway failure taxonomy; the distinguished non-error outcomes live in
/// [`Gated`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// No caller identity — fails closed, never falls through to a cached
    /// or default value
    Unauthenticated,
    /// Vault failure other than "not configured" or a healed decryption
    Vault(VaultError),
    /// Tracker API failure, already translated into the stable taxonomy
    Tracker(TrackerError),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Unauthenticated => write!(f, "User not authenticated"),
            GatewayError::Vault(e) => write!(f, "{}", e),
            GatewayError::Tracker(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Outcome of a credential-gated call.
///
/// `NotConfigured` and `CredentialsHealed` are onboarding states, not
/// failures: the UI prompts setup (plus an explanation of the automatic
/// cleanup in the healed case) rather than showing an error banner.
#[derive(Debug, Clone, PartialEq)]
pub enum Gated<T> {
    Value(T),
    /// User has never saved credentials
    NotConfigured,
    /// Stored credentials could not be decrypted; the corrupt record was
    /// deleted and the user must re-enter their key
    CredentialsHealed,
}

enum Resolved {
    Creds(crate::credentials::DecryptedCredentials),
    NotConfigured,
    Healed,
}

/// Gates every tracker call behind the caller's decrypted credential.
pub struct TrackerGateway {
    vault: Arc<CredentialVault>,
    cache: Arc<ScopedCache>,
}

impl TrackerGateway {
    pub fn new(vault: Arc<CredentialVault>, cache: Arc<ScopedCache>) -> Self {
        Self { vault, cache }
    }

    /// Resolves credentials for a user, self-healing on decryption failure.
    fn resolve(&self, user_id: &str) -> Result<Resolved, GatewayError> {
        match self.vault.fetch_decrypted(user_id) {
            Ok(Some(creds)) => Ok(Resolved::Creds(creds)),
            Ok(None) => Ok(Resolved::NotConfigured),
            Err(VaultError::Decryption) => {
                self.vault.self_heal(user_id);
                Ok(Resolved::Healed)
            }
            Err(e) => Err(GatewayError::Vault(e)),
        }
    }

    /// Runs a cacheable read against the tracker.
    ///
    /// The fetch closure receives a client bound to the user's endpoint and
    /// decrypted key, plus the tracker-side user id for queries that filter
    /// by user; nothing else escapes the vault. `operation` and `cache_key`
    /// are passed through to [`ScopedCache::get_or_fetch`].
    pub async fn fetch_cached<T, F, Fut>(
        &self,
        identity: Option<&str>,
        operation: &str,
        cache_key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Gated<T>, GatewayError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(TrackerClient, String) -> Fut,
        Fut: Future<Output = Result<T, TrackerError>>,
    {
        let user_id = identity.ok_or(GatewayError::Unauthenticated)?;

        let creds = match self.resolve(user_id)? {
            Resolved::Creds(creds) => creds,
            Resolved::NotConfigured => return Ok(Gated::NotConfigured),
            Resolved::Healed => {
                // Anything cached under the healed record is suspect too
                self.cache.invalidate_user(user_id).await;
                return Ok(Gated::CredentialsHealed);
            }
        };

        let base_url = creds.base_url;
        let api_key = creds.api_key;
        let tracker_user_id = creds.tracker_user_id;

        let value = self
            .cache
            .get_or_fetch(operation, cache_key, user_id, &base_url, ttl, || {
                fetch(TrackerClient::new(&base_url, &api_key), tracker_user_id)
            })
            .await
            .map_err(GatewayError::Tracker)?;

        Ok(Gated::Value(value))
    }

    /// Runs an uncached call (writes, or reads that must be fresh).
    ///
    /// The closure additionally receives the tracker-side user id for
    /// queries that filter by user. After a mutation the caller invalidates
    /// the affected operation tag via [`Self::invalidate_operation`].
    pub async fn with_client<T, F, Fut>(
        &self,
        identity: Option<&str>,
        action: F,
    ) -> Result<Gated<T>, GatewayError>
    where
        F: FnOnce(TrackerClient, String) -> Fut,
        Fut: Future<Output = Result<T, TrackerError>>,
    {
        let user_id = identity.ok_or(GatewayError::Unauthenticated)?;

        let creds = match self.resolve(user_id)? {
            Resolved::Creds(creds) => creds,
            Resolved::NotConfigured => return Ok(Gated::NotConfigured),
            Resolved::Healed => {
                self.cache.invalidate_user(user_id).await;
                return Ok(Gated::CredentialsHealed);
            }
        };

        let client = TrackerClient::new(&creds.base_url, &creds.api_key);
        let value = action(client, creds.tracker_user_id)
            .await
            .map_err(GatewayError::Tracker)?;

        Ok(Gated::Value(value))
    }

    /// Saves credentials, then purges every cache entry for the user.
    ///
    /// The invalidation is load-bearing: the cache key does not change when
    /// only the API key rotates, so results computed under the old key would
    /// otherwise survive until TTL expiry.
    pub async fn save_credentials(
        &self,
        identity: Option<&str>,
        base_url: &str,
        api_key: &str,
    ) -> Result<CredentialRecord, GatewayError> {
        let user_id = identity.ok_or(GatewayError::Unauthenticated)?;

        let record = self
            .vault
            .save(user_id, base_url, api_key)
            .await
            .map_err(GatewayError::Vault)?;

        self.cache.invalidate_user(user_id).await;
        Ok(record)
    }

    /// Fetches the stored record without decrypting (for status displays).
    pub fn credential_record(
        &self,
        identity: Option<&str>,
    ) -> Result<Option<CredentialRecord>, GatewayError> {
        let user_id = identity.ok_or(GatewayError::Unauthenticated)?;
        self.vault.fetch(user_id).map_err(GatewayError::Vault)
    }

    /// Deletes credentials and purges the user's cache. Idempotent.
    pub async fn delete_credentials(
        &self,
        identity: Option<&str>,
    ) -> Result<bool, GatewayError> {
        let user_id = identity.ok_or(GatewayError::Unauthenticated)?;

        let deleted = self.vault.delete(user_id).map_err(GatewayError::Vault)?;
        self.cache.invalidate_user(user_id).await;
        Ok(deleted)
    }

    /// Purges one operation's cached entries for the caller, e.g.
    /// time entries after a bulk submission.
    pub async fn invalidate_operation(&self, identity: Option<&str>, operation: &str) {
        if let Some(user_id) = identity {
            self.cache.invalidate_tag(&operation_tag(operation, user_id)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, CryptoBox, KeyVerifier};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticVerifier(&'static str);

    #[async_trait]
    impl KeyVerifier for StaticVerifier {
        async fn verify(&self, _base_url: &str, _api_key: &str) -> Result<String, VaultError> {
            Ok(self.0.to_string())
        }
    }

    struct Fixture {
        gateway: TrackerGateway,
        record_store: Arc<CredentialStore>,
    }

    fn fixture() -> Fixture {
        let record_store = Arc::new(CredentialStore::new(":memory:").unwrap());
        let crypto = Arc::new(CryptoBox::from_base64_key(&BASE64.encode([5u8; 32])).unwrap());
        let vault = Arc::new(CredentialVault::new(
            record_store.clone(),
            crypto,
            Arc::new(StaticVerifier("42")),
        ));
        let cache = Arc::new(ScopedCache::new(Arc::new(MemoryStore::new())));
        Fixture {
            gateway: TrackerGateway::new(vault, cache),
            record_store,
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_missing_identity_fails_closed() {
        let f = fixture();

        let result = f
            .gateway
            .fetch_cached::<Vec<String>, _, _>(
                None,
                "projects",
                "projects",
                TTL,
                |_client, _uid| async { Ok(vec!["never".to_string()]) },
            )
            .await;

        assert_eq!(result, Err(GatewayError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_unconfigured_user_gets_onboarding_state() {
        let f = fixture();

        let result = f
            .gateway
            .fetch_cached::<Vec<String>, _, _>(
                Some("u1"),
                "projects",
                "projects",
                TTL,
                |_client, _uid| async { Ok(vec!["never".to_string()]) },
            )
            .await
            .unwrap();

        assert_eq!(result, Gated::NotConfigured);
    }

    #[tokio::test]
    async fn test_cached_read_skips_second_fetch() {
        let f = fixture();
        f.gateway
            .save_credentials(Some("u1"), "https://t.example", "key-abc")
            .await
            .unwrap();

        let fetches = AtomicUsize::new(0);
        for _ in 0..2 {
            let result = f
                .gateway
                .fetch_cached::<Vec<String>, _, _>(
                    Some("u1"),
                    "projects",
                    "projects",
                    TTL,
                    |_client, _uid| async {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        Ok(vec!["p1".to_string()])
                    },
                )
                .await
                .unwrap();
            assert_eq!(result, Gated::Value(vec!["p1".to_string()]));
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_invalidates_previous_cache() {
        let f = fixture();
        f.gateway
            .save_credentials(Some("u1"), "https://t.example", "key-old")
            .await
            .unwrap();

        let fetches = AtomicUsize::new(0);
        let fetch_once = |tag: &'static str| {
            let fetches = &fetches;
            f.gateway
                .fetch_cached::<String, _, _>(
                    Some("u1"),
                    "projects",
                    "projects",
                    TTL,
                    move |_client, _uid| async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        Ok(tag.to_string())
                    },
                )
        };

        assert_eq!(fetch_once("old").await.unwrap(), Gated::Value("old".to_string()));

        // Key rotates, base URL unchanged — cache key is identical, so only
        // the tag invalidation inside save keeps this fresh
        f.gateway
            .save_credentials(Some("u1"), "https://t.example", "key-new")
            .await
            .unwrap();

        assert_eq!(fetch_once("new").await.unwrap(), Gated::Value("new".to_string()));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupted_record_heals_then_prompts_setup() {
        let f = fixture();
        f.gateway
            .save_credentials(Some("u1"), "https://t.example", "key-abc")
            .await
            .unwrap();

        // Corrupt the stored auth tag behind the vault's back
        let mut record = f.record_store.get("u1").unwrap().unwrap();
        record.sealed_api_key.auth_tag = BASE64.encode([0u8; 16]);
        f.record_store.upsert(&record).unwrap();

        let result = f
            .gateway
            .fetch_cached::<Vec<String>, _, _>(
                Some("u1"),
                "projects",
                "projects",
                TTL,
                |_client, _uid| async { Ok(vec!["never".to_string()]) },
            )
            .await
            .unwrap();
        assert_eq!(result, Gated::CredentialsHealed);

        // Record is gone; the next call reports not-configured
        assert!(f.record_store.get("u1").unwrap().is_none());
        let result = f
            .gateway
            .fetch_cached::<Vec<String>, _, _>(
                Some("u1"),
                "projects",
                "projects",
                TTL,
                |_client, _uid| async { Ok(vec!["never".to_string()]) },
            )
            .await
            .unwrap();
        assert_eq!(result, Gated::NotConfigured);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_purges_cache() {
        let f = fixture();
        f.gateway
            .save_credentials(Some("u1"), "https://t.example", "key-abc")
            .await
            .unwrap();

        assert!(f.gateway.delete_credentials(Some("u1")).await.unwrap());
        assert!(!f.gateway.delete_credentials(Some("u1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_tracker_error_propagates_through_taxonomy() {
        let f = fixture();
        f.gateway
            .save_credentials(Some("u1"), "https://t.example", "key-abc")
            .await
            .unwrap();

        let result = f
            .gateway
            .fetch_cached::<Vec<String>, _, _>(
                Some("u1"),
                "projects",
                "projects",
                TTL,
                |_client, _uid| async { Err(TrackerError::Unauthorized) },
            )
            .await;

        assert_eq!(
            result,
            Err(GatewayError::Tracker(TrackerError::Unauthorized))
        );
    }
}
