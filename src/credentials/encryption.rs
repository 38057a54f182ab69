//! AES-256-GCM envelope encryption for tracker API keys.
//!
//! Each key is sealed with a fresh random nonce and stored alongside its
//! detached authentication tag. The master key must be 32 bytes (256 bits)
//! and is provided once at startup from an environment variable.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes (128 bits)
const TAG_SIZE: usize = 16;

/// Errors from master-key validation at startup.
#[derive(Debug)]
pub enum KeyError {
    /// Key material is not valid base64
    InvalidBase64(String),
    /// Key decoded to the wrong number of bytes
    WrongLength(usize),
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::InvalidBase64(msg) => {
                write!(f, "Failed to decode base64 encryption key: {}", msg)
            }
            KeyError::WrongLength(got) => write!(
                f,
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE, got
            ),
        }
    }
}

impl std::error::Error for KeyError {}

/// Errors from seal/open operations.
///
/// Cryptographic failures are never transient, so there is no retry path.
#[derive(Debug, PartialEq)]
pub enum CryptoError {
    /// Authentication tag mismatch on open: wrong key, corrupted bytes,
    /// or tampering. Never masked as "not found".
    Integrity,
    /// An envelope field is not valid base64
    Encoding(String),
    /// Nonce decoded to the wrong length
    NonceSize(usize),
    /// Cipher rejected the seal operation
    SealFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::Integrity => {
                write!(f, "Integrity check failed (wrong key or corrupted data)")
            }
            CryptoError::Encoding(msg) => write!(f, "Invalid envelope encoding: {}", msg),
            CryptoError::NonceSize(got) => {
                write!(f, "Invalid nonce size: expected {}, got {}", NONCE_SIZE, got)
            }
            CryptoError::SealFailed => write!(f, "Encryption failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Encrypted secret plus the envelope metadata needed to open it.
///
/// The three fields form a consistent triple and must always be written and
/// replaced together.
#[derive(Clone, Debug, PartialEq)]
pub struct SealedSecret {
    /// Base64-encoded ciphertext (tag detached)
    pub ciphertext: String,
    /// Base64-encoded 96-bit nonce, unique per seal
    pub nonce: String,
    /// Base64-encoded 128-bit authentication tag
    pub auth_tag: String,
}

/// Envelope encryption with a process-wide symmetric key.
///
/// The key is immutable once constructed and may be shared across tasks
/// without locking.
pub struct CryptoBox {
    cipher: Aes256Gcm,
}

impl CryptoBox {
    /// Builds a `CryptoBox` from a base64-encoded 32-byte master key.
    ///
    /// An absent or wrong-length key is a deployment precondition failure;
    /// the process should refuse to start rather than continue degraded.
    pub fn from_base64_key(key_base64: &str) -> Result<Self, KeyError> {
        let key_bytes = BASE64
            .decode(key_base64)
            .map_err(|e| KeyError::InvalidBase64(e.to_string()))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(KeyError::WrongLength(key_bytes.len()));
        }

        // Length is checked above, new_from_slice cannot fail here
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).expect("key length already validated");

        Ok(Self { cipher })
    }

    /// Encrypts a plaintext secret with a fresh random nonce.
    ///
    /// The nonce is generated internally and never caller-supplied: reuse
    /// under the same key breaks confidentiality.
    pub fn seal(&self, plaintext: &str) -> Result<SealedSecret, CryptoError> {
        let nonce_bytes = Aes256Gcm::generate_nonce(&mut OsRng);

        // The aead crate appends the 16-byte tag to the ciphertext; split it
        // off so the record stores a detached triple.
        let mut combined = self
            .cipher
            .encrypt(&nonce_bytes, plaintext.as_bytes())
            .map_err(|_| CryptoError::SealFailed)?;
        let tag_bytes = combined.split_off(combined.len() - TAG_SIZE);

        Ok(SealedSecret {
            ciphertext: BASE64.encode(&combined),
            nonce: BASE64.encode(nonce_bytes),
            auth_tag: BASE64.encode(&tag_bytes),
        })
    }

    /// Decrypts a sealed secret, verifying its authentication tag first.
    ///
    /// Any mismatch — wrong key after a rotation, corrupted bytes, tampering —
    /// is reported as `CryptoError::Integrity`.
    pub fn open(&self, sealed: &SealedSecret) -> Result<String, CryptoError> {
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let nonce_bytes = BASE64
            .decode(&sealed.nonce)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let tag_bytes = BASE64
            .decode(&sealed.auth_tag)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::NonceSize(nonce_bytes.len()));
        }

        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut combined = ciphertext;
        combined.extend_from_slice(&tag_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, combined.as_ref())
            .map_err(|_| CryptoError::Integrity)?;

        String::from_utf8(plaintext_bytes).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}
