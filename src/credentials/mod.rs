//! Encrypted tracker credential storage.
//!
//! One record per user holds their tracker endpoint and API key, the key
//! encrypted at rest with AES-256-GCM. The vault owns the record lifecycle:
//! verify against the tracker, seal, upsert as a whole row, and delete
//! (explicitly or via self-heal when decryption becomes impossible).
//!
//! # Security
//! - API keys encrypted at rest, unique nonce per seal
//! - Master key held in memory only (from env var), never persisted
//! - A record exists only after the raw key round-tripped against the
//!   tracker's verification endpoint
//! - Decryption failure is surfaced as a typed error, never as "not found"

use chrono::{DateTime, Utc};

pub mod encryption;
mod storage;
mod vault;

pub use encryption::{CryptoBox, CryptoError, KeyError, SealedSecret};
pub use storage::CredentialStore;
pub use vault::{CredentialVault, KeyVerifier, VaultError};

/// Stored credential record for one user (1:1 on `user_id`).
#[derive(Clone, Debug, PartialEq)]
pub struct CredentialRecord {
    /// Opaque stable identifier of the authenticated principal
    pub user_id: String,
    /// Normalized tracker endpoint, trailing slash stripped. Not secret.
    pub base_url: String,
    /// Encrypted API key and its envelope metadata
    pub sealed_api_key: SealedSecret,
    /// The tracker's own identifier for this user, resolved at save time
    pub tracker_user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decrypted view handed to callers that need to talk to the tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptedCredentials {
    pub base_url: String,
    pub api_key: String,
    pub tracker_user_id: String,
}
