//! Rate limiting for magic-link issuance.
//!
//! Two layers per identity, evaluated in order: a short cooldown between
//! requests, then a fixed-window hourly quota. Identities are never stored
//! raw — the limiter keys on an HMAC of the identity so the counter store
//! holds no addressable personal data.
//!
//! If the counter store is unreachable the limiter fails open: locking every
//! legitimate user out of sign-in is worse than briefly losing abuse
//! protection. Each fail-open is logged as a warning.

use crate::store::KeyValueStore;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Default cooldown between issuance requests.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(90);

/// Default fixed window for the hourly quota.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Default number of issuances allowed per window.
pub const DEFAULT_QUOTA: i64 = 3;

/// Why a request was denied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DenyReason {
    /// Still inside the cooldown after a previous issuance
    Cooldown,
    /// Window quota exhausted
    RateLimit,
}

impl DenyReason {
    /// Stable wire label for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Cooldown => "cooldown",
            DenyReason::RateLimit => "rate_limit",
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    Allowed,
    Denied {
        reason: DenyReason,
        /// Seconds until the caller may retry; precise so a legitimate
        /// user can wait deterministically instead of guessing.
        retry_after_seconds: u64,
    },
}

/// Cooldown + fixed-window limiter over a shared counter store.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    hash_secret: String,
    cooldown: Duration,
    window: Duration,
    quota: i64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        hash_secret: String,
        cooldown: Duration,
        window: Duration,
        quota: i64,
    ) -> Self {
        Self {
            store,
            hash_secret,
            cooldown,
            window,
            quota,
        }
    }

    /// HMAC-SHA256 of the normalized identity, hex-encoded.
    ///
    /// Normalization (lowercase, trimmed) keeps "User@Example.com " and
    /// "user@example.com" in the same bucket.
    fn hash_identity(&self, identity: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.hash_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(identity.trim().to_lowercase().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn cooldown_key(&self, id: &str) -> String {
        format!("cooldown:{}", id)
    }

    fn window_key(&self, id: &str) -> String {
        format!("ratelimit:{}", id)
    }

    /// Checks whether `identity` may issue a request and reserves a slot in
    /// the window counter if so.
    ///
    /// Evaluation order short-circuits: cooldown first, then the window
    /// quota. The cooldown itself is only armed by `commit_cooldown` once
    /// the gated action actually succeeded.
    pub async fn check_and_reserve(&self, identity: &str) -> Decision {
        let id = self.hash_identity(identity);

        // Step 1: short cooldown
        match self.store.exists(&self.cooldown_key(&id)).await {
            Ok(true) => {
                let retry = match self.store.ttl(&self.cooldown_key(&id)).await {
                    Ok(Some(ttl)) if ttl > Duration::ZERO => ttl.as_secs().max(1),
                    _ => self.cooldown.as_secs(),
                };
                return Decision::Denied {
                    reason: DenyReason::Cooldown,
                    retry_after_seconds: retry,
                };
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, identity_hash = %id, "Counter store unreachable, failing open");
                return Decision::Allowed;
            }
        }

        // Step 2: fixed-window quota. First increment in a window arms its
        // expiry; the counter then resets naturally when the window elapses.
        let count = match self.store.incr(&self.window_key(&id)).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, identity_hash = %id, "Counter store unreachable, failing open");
                return Decision::Allowed;
            }
        };

        if count == 1 {
            if let Err(e) = self.store.expire(&self.window_key(&id), self.window).await {
                warn!(error = %e, identity_hash = %id, "Failed to arm window expiry");
            }
        }

        if count > self.quota {
            let retry = match self.store.ttl(&self.window_key(&id)).await {
                Ok(Some(ttl)) if ttl > Duration::ZERO => ttl.as_secs().max(1),
                _ => self.window.as_secs(),
            };
            return Decision::Denied {
                reason: DenyReason::RateLimit,
                retry_after_seconds: retry,
            };
        }

        Decision::Allowed
    }

    /// Arms the cooldown marker. Callers invoke this only after the gated
    /// action succeeded (e.g. the issuance email was sent).
    pub async fn commit_cooldown(&self, identity: &str) {
        let id = self.hash_identity(identity);
        if let Err(e) = self
            .store
            .set_ex(&self.cooldown_key(&id), "1", self.cooldown)
            .await
        {
            warn!(error = %e, identity_hash = %id, "Failed to set issuance cooldown");
        }
    }

    /// Clears both the cooldown marker and the window counter.
    ///
    /// Invoked after the identity completes authentication — proof of
    /// possession earns a clean slate.
    pub async fn clear(&self, identity: &str) {
        let id = self.hash_identity(identity);
        if let Err(e) = self.store.del(&self.cooldown_key(&id)).await {
            warn!(error = %e, identity_hash = %id, "Failed to clear cooldown marker");
        }
        if let Err(e) = self.store.del(&self.window_key(&id)).await {
            warn!(error = %e, identity_hash = %id, "Failed to clear window counter");
        }
    }
}
