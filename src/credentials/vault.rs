//! Credential vault: verify, seal, persist, decrypt, self-heal.
//!
//! Within a save the ordering is strict: verify against the tracker, then
//! encrypt, then persist. Encryption never happens on an unverified key and
//! persistence never happens on an unencrypted key. Writes are whole-record
//! replaces.

use super::encryption::CryptoBox;
use super::{CredentialRecord, CredentialStore, DecryptedCredentials};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Vault failure taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum VaultError {
    /// Tracker rejected the key or was unreachable at save time.
    /// Nothing was persisted.
    Verification(String),
    /// Underlying record store unavailable; no partial writes occurred
    Storage(String),
    /// Integrity check failed on read — key rotated or record corrupted.
    /// Distinct from "not configured" so callers can trigger self-healing.
    Decryption,
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::Verification(msg) => {
                write!(f, "Credential verification failed: {}", msg)
            }
            VaultError::Storage(msg) => write!(f, "Credential storage error: {}", msg),
            VaultError::Decryption => {
                write!(f, "Stored credentials could not be decrypted")
            }
        }
    }
}

impl std::error::Error for VaultError {}

/// Seam for the tracker's identity-verification call, so tests can stub the
/// round-trip.
#[async_trait]
pub trait KeyVerifier: Send + Sync {
    /// Returns the tracker's own user id for this key, or a verification
    /// failure (rejection and unreachability are treated identically — a
    /// timed-out verification must not persist anything).
    async fn verify(&self, base_url: &str, api_key: &str) -> Result<String, VaultError>;
}

/// Owns the lifecycle of per-user tracker credential records.
pub struct CredentialVault {
    store: Arc<CredentialStore>,
    crypto: Arc<CryptoBox>,
    verifier: Arc<dyn KeyVerifier>,
}

impl CredentialVault {
    pub fn new(
        store: Arc<CredentialStore>,
        crypto: Arc<CryptoBox>,
        verifier: Arc<dyn KeyVerifier>,
    ) -> Self {
        Self {
            store,
            crypto,
            verifier,
        }
    }

    /// Verifies the raw key against the tracker, seals it, and upserts the
    /// full record.
    ///
    /// On success the caller must invalidate every cache tag scoped to this
    /// user — the vault does not own the cache.
    pub async fn save(
        &self,
        user_id: &str,
        base_url: &str,
        api_key: &str,
    ) -> Result<CredentialRecord, VaultError> {
        let base_url = normalize_base_url(base_url);

        // Verify before encrypting, encrypt before persisting
        let tracker_user_id = self.verifier.verify(&base_url, api_key).await?;

        let sealed = self
            .crypto
            .seal(api_key)
            .map_err(|e| VaultError::Storage(format!("Failed to seal API key: {}", e)))?;

        // created_at survives replacement; everything else is a fresh triple
        let created_at = self
            .store
            .get(user_id)
            .map_err(|e| VaultError::Storage(e.to_string()))?
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);

        let record = CredentialRecord {
            user_id: user_id.to_string(),
            base_url,
            sealed_api_key: sealed,
            tracker_user_id,
            created_at,
            updated_at: Utc::now(),
        };

        self.store
            .upsert(&record)
            .map_err(|e| VaultError::Storage(e.to_string()))?;

        info!(user_id = %user_id, base_url = %record.base_url, "Credentials saved");
        Ok(record)
    }

    /// Fetches the stored record. `Ok(None)` means never configured, which
    /// is not an error condition.
    pub fn fetch(&self, user_id: &str) -> Result<Option<CredentialRecord>, VaultError> {
        self.store
            .get(user_id)
            .map_err(|e| VaultError::Storage(e.to_string()))
    }

    /// Fetches and decrypts the stored credentials.
    ///
    /// A failed integrity check is `Err(VaultError::Decryption)`, distinct
    /// from `Ok(None)`, so the composition layer can trigger self-healing.
    pub fn fetch_decrypted(
        &self,
        user_id: &str,
    ) -> Result<Option<DecryptedCredentials>, VaultError> {
        let Some(record) = self.fetch(user_id)? else {
            return Ok(None);
        };

        let api_key = self.crypto.open(&record.sealed_api_key).map_err(|e| {
            warn!(user_id = %user_id, error = %e, "Failed to decrypt stored credentials");
            VaultError::Decryption
        })?;

        Ok(Some(DecryptedCredentials {
            base_url: record.base_url,
            api_key,
            tracker_user_id: record.tracker_user_id,
        }))
    }

    /// Deletes a record that can no longer be decrypted.
    ///
    /// Intentionally destructive: an undecryptable key is unrecoverable (the
    /// master key rotated or the bytes are corrupt) and the only forward path
    /// is for the user to re-enter it. Idempotent; a failed delete is logged,
    /// not raised, since the next read will hit the same path again.
    pub fn self_heal(&self, user_id: &str) {
        warn!(user_id = %user_id, "Self-heal: removing undecryptable credential record");
        if let Err(e) = self.store.delete(user_id) {
            warn!(user_id = %user_id, error = %e, "Self-heal delete failed");
        }
    }

    /// Deletes the record. Returns whether one existed; deleting a
    /// nonexistent record is success.
    pub fn delete(&self, user_id: &str) -> Result<bool, VaultError> {
        let deleted = self
            .store
            .delete(user_id)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        if deleted {
            info!(user_id = %user_id, "Credentials deleted");
        }
        Ok(deleted)
    }
}

/// Strips trailing slashes so the same endpoint always produces the same
/// stored and cache-keyed URL.
fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    /// Verifier that accepts any key and returns a fixed tracker user id.
    struct StaticVerifier(&'static str);

    #[async_trait]
    impl KeyVerifier for StaticVerifier {
        async fn verify(&self, _base_url: &str, _api_key: &str) -> Result<String, VaultError> {
            Ok(self.0.to_string())
        }
    }

    /// Verifier that rejects every key, as the tracker would on a 401.
    struct RejectingVerifier;

    #[async_trait]
    impl KeyVerifier for RejectingVerifier {
        async fn verify(&self, _base_url: &str, _api_key: &str) -> Result<String, VaultError> {
            Err(VaultError::Verification(
                "Invalid API key or unauthorized access".to_string(),
            ))
        }
    }

    fn test_vault(verifier: Arc<dyn KeyVerifier>) -> CredentialVault {
        let store = Arc::new(CredentialStore::new(":memory:").unwrap());
        let crypto = Arc::new(CryptoBox::from_base64_key(&BASE64.encode([3u8; 32])).unwrap());
        CredentialVault::new(store, crypto, verifier)
    }

    #[tokio::test]
    async fn test_save_then_fetch_decrypted() {
        let vault = test_vault(Arc::new(StaticVerifier("42")));

        vault
            .save("u1", "https://t.example", "key-abc")
            .await
            .expect("save failed");

        let creds = vault
            .fetch_decrypted("u1")
            .expect("fetch failed")
            .expect("credentials missing");
        assert_eq!(creds.base_url, "https://t.example");
        assert_eq!(creds.api_key, "key-abc");
        assert_eq!(creds.tracker_user_id, "42");
    }

    #[tokio::test]
    async fn test_base_url_normalized_on_save() {
        let vault = test_vault(Arc::new(StaticVerifier("42")));

        let record = vault
            .save("u1", "  https://t.example///", "key-abc")
            .await
            .unwrap();
        assert_eq!(record.base_url, "https://t.example");
    }

    #[tokio::test]
    async fn test_rejected_key_persists_nothing() {
        let vault = test_vault(Arc::new(RejectingVerifier));

        let err = vault
            .save("u1", "https://t.example", "bad-key")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Verification(_)));

        assert!(vault.fetch("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resave_replaces_envelope_and_keeps_created_at() {
        let vault = test_vault(Arc::new(StaticVerifier("42")));

        let first = vault.save("u1", "https://t.example", "key-1").await.unwrap();
        let second = vault.save("u1", "https://t.example", "key-2").await.unwrap();

        // Fresh nonce and ciphertext on every save, creation time preserved
        assert_ne!(first.sealed_api_key.nonce, second.sealed_api_key.nonce);
        assert_ne!(first.sealed_api_key.ciphertext, second.sealed_api_key.ciphertext);
        assert_eq!(first.created_at, second.created_at);

        let creds = vault.fetch_decrypted("u1").unwrap().unwrap();
        assert_eq!(creds.api_key, "key-2");
    }

    #[tokio::test]
    async fn test_fetch_unconfigured_is_none_not_error() {
        let vault = test_vault(Arc::new(StaticVerifier("42")));
        assert!(vault.fetch("nobody").unwrap().is_none());
        assert!(vault.fetch_decrypted("nobody").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_tag_is_decryption_error_and_heals() {
        let store = Arc::new(CredentialStore::new(":memory:").unwrap());
        let crypto = Arc::new(CryptoBox::from_base64_key(&BASE64.encode([3u8; 32])).unwrap());
        let vault = CredentialVault::new(store.clone(), crypto, Arc::new(StaticVerifier("42")));

        vault.save("u1", "https://t.example", "key-abc").await.unwrap();

        // Replace the stored auth tag with garbage
        let mut record = store.get("u1").unwrap().unwrap();
        record.sealed_api_key.auth_tag = BASE64.encode([0u8; 16]);
        store.upsert(&record).unwrap();

        assert_eq!(vault.fetch_decrypted("u1"), Err(VaultError::Decryption));

        vault.self_heal("u1");
        assert!(vault.fetch("u1").unwrap().is_none());

        // Healing an already-absent record is a no-op
        vault.self_heal("u1");
        assert!(vault.fetch("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let vault = test_vault(Arc::new(StaticVerifier("42")));

        vault.save("u1", "https://t.example", "key-abc").await.unwrap();
        assert!(vault.delete("u1").unwrap());
        assert!(!vault.delete("u1").unwrap());
    }
}
