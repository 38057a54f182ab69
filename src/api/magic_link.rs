//! Magic-link issuance endpoints.
//!
//! Issuance is the abuse surface (it triggers outbound email), so it sits
//! behind the cooldown + window limiter. The cooldown is only armed after
//! the link actually goes out; a failed send never locks the user out of
//! retrying immediately.
//!
//! Completion clears the limiter, which is a privilege: it requires the
//! token from the delivered link as proof of possession. The pending token
//! is held in the key-value store until it is redeemed or expires, and a
//! lookup miss fails closed.

use crate::ratelimit::{Decision, RateLimiter};
use crate::store::KeyValueStore;
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// How long an issued link stays redeemable.
const LINK_TTL: Duration = Duration::from_secs(15 * 60);

/// Delivers a sign-in link to the user. Production wires a mail provider;
/// development uses [`LogSender`].
#[async_trait]
pub trait LinkSender: Send + Sync {
    async fn send(&self, email: &str, token: &str) -> Result<()>;
}

/// Logs the link instead of sending it.
pub struct LogSender;

#[async_trait]
impl LinkSender for LogSender {
    async fn send(&self, email: &str, token: &str) -> Result<()> {
        info!(email = %email, token = %token, "Magic link issued (log delivery)");
        Ok(())
    }
}

/// Shared application state for the magic-link API
#[derive(Clone)]
pub struct MagicLinkAppState {
    pub limiter: Arc<RateLimiter>,
    pub sender: Arc<dyn LinkSender>,
    /// Holds pending tokens between issuance and completion
    pub store: Arc<dyn KeyValueStore>,
}

/// Request body for POST /api/auth/magic-link
#[derive(Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

/// Request body for POST /api/auth/magic-link/complete
#[derive(Deserialize)]
pub struct CompleteRequest {
    /// The token from the delivered link
    pub token: String,
}

/// Generic success response; never reveals whether the address exists
#[derive(Serialize)]
pub struct MagicLinkResponse {
    pub success: bool,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Denial response for 429s
#[derive(Serialize)]
struct DeniedResponse {
    error: String,
    reason: &'static str,
    retry_after_seconds: u64,
}

/// Create the magic-link API router
pub fn create_magic_link_router(state: MagicLinkAppState) -> Router {
    Router::new()
        .route("/api/auth/magic-link", post(request_magic_link))
        .route("/api/auth/magic-link/complete", post(complete_sign_in))
        .with_state(Arc::new(state))
}

fn token_key(token: &str) -> String {
    format!("magiclink:{}", token)
}

/// POST /api/auth/magic-link - Issue a sign-in link
///
/// Reserve-then-commit against the limiter: the window slot is taken up
/// front, the cooldown only after delivery succeeds.
async fn request_magic_link(
    State(state): State<Arc<MagicLinkAppState>>,
    Json(body): Json<MagicLinkRequest>,
) -> Response {
    let email = body.email.trim();
    if email.is_empty() || !email.contains('@') {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "A valid email address is required".to_string(),
            }),
        )
            .into_response();
    }

    match state.limiter.check_and_reserve(email).await {
        Decision::Allowed => {}
        Decision::Denied {
            reason,
            retry_after_seconds,
        } => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_seconds.to_string())],
                Json(DeniedResponse {
                    error: "Too many sign-in link requests".to_string(),
                    reason: reason.as_str(),
                    retry_after_seconds,
                }),
            )
                .into_response();
        }
    }

    let token = Uuid::new_v4().to_string();
    if let Err(e) = state.sender.send(email, &token).await {
        warn!(error = %e, "Failed to deliver magic link");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to send sign-in link".to_string(),
            }),
        )
            .into_response();
    }

    // Record the pending token so completion can prove possession. A store
    // failure only costs the user the limiter reset, not the sign-in.
    if let Err(e) = state
        .store
        .set_ex(&token_key(&token), email, LINK_TTL)
        .await
    {
        warn!(error = %e, "Failed to record pending magic-link token");
    }

    state.limiter.commit_cooldown(email).await;
    (StatusCode::OK, Json(MagicLinkResponse { success: true })).into_response()
}

/// POST /api/auth/magic-link/complete - Redeem a delivered link
///
/// Possession of the token is the proof that the sign-in succeeded; only
/// then is the identity's limiter state cleared. The token is single-use.
/// An unknown, expired, or unverifiable token fails closed.
async fn complete_sign_in(
    State(state): State<Arc<MagicLinkAppState>>,
    Json(body): Json<CompleteRequest>,
) -> Response {
    let key = token_key(body.token.trim());

    let email = match state.store.get(&key).await {
        Ok(Some(email)) => email,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or expired sign-in token".to_string(),
                }),
            )
                .into_response();
        }
        Err(e) => {
            warn!(error = %e, "Token store unreachable during completion");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or expired sign-in token".to_string(),
                }),
            )
                .into_response();
        }
    };

    if let Err(e) = state.store.del(&key).await {
        warn!(error = %e, "Failed to consume magic-link token");
    }

    state.limiter.clear(&email).await;
    (StatusCode::OK, Json(MagicLinkResponse { success: true })).into_response()
}
