//! Credentials API endpoints.
//!
//! Save, inspect, and delete the caller's tracker credentials. Responses
//! never include ciphertext or envelope fields; the GET endpoint returns a
//! sanitized status only.

use crate::auth::extract_bearer_user;
use crate::credentials::VaultError;
use crate::gateway::{GatewayError, TrackerGateway};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Shared application state for the credentials API
#[derive(Clone)]
pub struct CredentialsAppState {
    pub gateway: Arc<TrackerGateway>,
}

/// Request body for POST /api/credentials
#[derive(Deserialize)]
pub struct SaveCredentialsRequest {
    pub base_url: String,
    pub api_key: String,
}

/// Response for POST /api/credentials
#[derive(Serialize)]
pub struct SaveCredentialsResponse {
    pub success: bool,
    pub base_url: String,
    pub tracker_user_id: String,
}

/// Sanitized credential status for GET /api/credentials
#[derive(Serialize)]
pub struct CredentialStatusResponse {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Response for DELETE /api/credentials
#[derive(Serialize)]
pub struct DeleteCredentialsResponse {
    pub success: bool,
    pub existed: bool,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the credentials API router
pub fn create_credentials_router(state: CredentialsAppState) -> Router {
    Router::new()
        .route("/api/credentials", post(save_credentials))
        .route("/api/credentials", get(credential_status))
        .route("/api/credentials", delete(delete_credentials))
        .with_state(Arc::new(state))
}

/// POST /api/credentials - Verify and store the caller's tracker API key
///
/// The key is round-tripped against the tracker before anything is
/// persisted; a rejected or unreachable tracker stores nothing.
async fn save_credentials(
    State(state): State<Arc<CredentialsAppState>>,
    headers: HeaderMap,
    Json(body): Json<SaveCredentialsRequest>,
) -> Result<Json<SaveCredentialsResponse>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    if body.base_url.trim().is_empty() || body.api_key.trim().is_empty() {
        return Err(AppError::BadRequest(
            "base_url and api_key are required".to_string(),
        ));
    }

    let record = state
        .gateway
        .save_credentials(Some(&user_id), &body.base_url, &body.api_key)
        .await?;

    Ok(Json(SaveCredentialsResponse {
        success: true,
        base_url: record.base_url,
        tracker_user_id: record.tracker_user_id,
    }))
}

/// GET /api/credentials - Sanitized status of the caller's credentials
async fn credential_status(
    State(state): State<Arc<CredentialsAppState>>,
    headers: HeaderMap,
) -> Result<Json<CredentialStatusResponse>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let record = state.gateway.credential_record(Some(&user_id))?;

    Ok(Json(match record {
        Some(record) => CredentialStatusResponse {
            configured: true,
            base_url: Some(record.base_url),
            tracker_user_id: Some(record.tracker_user_id),
            updated_at: Some(record.updated_at),
        },
        None => CredentialStatusResponse {
            configured: false,
            base_url: None,
            tracker_user_id: None,
            updated_at: None,
        },
    }))
}

/// DELETE /api/credentials - Remove the caller's credentials
///
/// Idempotent; deleting when nothing is stored still succeeds.
async fn delete_credentials(
    State(state): State<Arc<CredentialsAppState>>,
    headers: HeaderMap,
) -> Result<Json<DeleteCredentialsResponse>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let existed = state.gateway.delete_credentials(Some(&user_id)).await?;

    Ok(Json(DeleteCredentialsResponse {
        success: true,
        existed,
    }))
}

/// Application error types
pub(crate) enum AppError {
    Unauthorized(String),
    BadRequest(String),
    Verification(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Verification(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unauthenticated => AppError::Unauthorized(e.to_string()),
            GatewayError::Vault(VaultError::Verification(msg)) => AppError::Verification(msg),
            GatewayError::Vault(e) => {
                warn!(error = %e, "Vault failure in credentials API");
                AppError::Internal("Failed to access credential storage".to_string())
            }
            GatewayError::Tracker(e) => {
                warn!(error = %e, "Tracker failure in credentials API");
                AppError::Internal("Tracker request failed".to_string())
            }
        }
    }
}
