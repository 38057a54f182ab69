//! SQLite persistence for credential records.
//!
//! Stores the already-sealed envelope; encryption and decryption happen in
//! the vault, so this layer never sees a raw API key.
//!
//! # Schema
//! ```sql
//! CREATE TABLE credentials (
//!     user_id TEXT PRIMARY KEY,
//!     base_url TEXT NOT NULL,
//!     api_key_ciphertext TEXT NOT NULL,
//!     api_key_nonce TEXT NOT NULL,
//!     api_key_tag TEXT NOT NULL,
//!     tracker_user_id TEXT NOT NULL,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//! ```
//!
//! Writes are whole-row upserts: ciphertext, nonce, and tag must stay a
//! consistent triple, so partial field updates are forbidden.
//!
//! # Thread Safety
//! - Connection is wrapped in Mutex for safe concurrent access
//! - SQLite itself is thread-safe with serialized mode

use super::{CredentialRecord, SealedSecret};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Credential record store backed by SQLite, one row per user.
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Creates or opens a credential store at `db_path` (`:memory:` in tests).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open credentials database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                user_id TEXT PRIMARY KEY,
                base_url TEXT NOT NULL,
                api_key_ciphertext TEXT NOT NULL,
                api_key_nonce TEXT NOT NULL,
                api_key_tag TEXT NOT NULL,
                tracker_user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts or fully replaces the record for `record.user_id`.
    ///
    /// `created_at` survives a replace; everything else is overwritten
    /// together so the envelope triple can never mix generations.
    pub fn upsert(&self, record: &CredentialRecord) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO credentials (
                    user_id, base_url,
                    api_key_ciphertext, api_key_nonce, api_key_tag,
                    tracker_user_id, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(user_id) DO UPDATE SET
                    base_url = excluded.base_url,
                    api_key_ciphertext = excluded.api_key_ciphertext,
                    api_key_nonce = excluded.api_key_nonce,
                    api_key_tag = excluded.api_key_tag,
                    tracker_user_id = excluded.tracker_user_id,
                    updated_at = excluded.updated_at
                "#,
                params![
                    record.user_id,
                    record.base_url,
                    record.sealed_api_key.ciphertext,
                    record.sealed_api_key.nonce,
                    record.sealed_api_key.auth_tag,
                    record.tracker_user_id,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to upsert credential record")?;

        Ok(())
    }

    /// Fetches the record for `user_id`. `Ok(None)` means never configured —
    /// not an error condition.
    pub fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                r#"
                SELECT user_id, base_url,
                       api_key_ciphertext, api_key_nonce, api_key_tag,
                       tracker_user_id, created_at, updated_at
                FROM credentials
                WHERE user_id = ?1
                "#,
                params![user_id],
                |row| {
                    Ok(RawRow {
                        user_id: row.get(0)?,
                        base_url: row.get(1)?,
                        ciphertext: row.get(2)?,
                        nonce: row.get(3)?,
                        auth_tag: row.get(4)?,
                        tracker_user_id: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credential record")?;

        record.map(RawRow::into_record).transpose()
    }

    /// Deletes the record for `user_id`. Returns whether a row existed;
    /// deleting a nonexistent record is success.
    pub fn delete(&self, user_id: &str) -> Result<bool> {
        let rows_affected = self
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM credentials WHERE user_id = ?1", params![user_id])
            .context("Failed to delete credential record")?;

        Ok(rows_affected > 0)
    }
}

struct RawRow {
    user_id: String,
    base_url: String,
    ciphertext: String,
    nonce: String,
    auth_tag: String,
    tracker_user_id: String,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn into_record(self) -> Result<CredentialRecord> {
        let parse = |s: &str| -> Result<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .context("Failed to parse stored timestamp")
        };

        Ok(CredentialRecord {
            user_id: self.user_id,
            base_url: self.base_url,
            sealed_api_key: SealedSecret {
                ciphertext: self.ciphertext,
                nonce: self.nonce,
                auth_tag: self.auth_tag,
            },
            tracker_user_id: self.tracker_user_id,
            created_at: parse(&self.created_at)?,
            updated_at: parse(&self.updated_at)?,
        })
    }
}
