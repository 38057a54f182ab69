//! Tracker read/write endpoints.
//!
//! Every handler resolves the caller, then goes through the gateway so the
//! credential gating, caching, and self-heal behavior are identical across
//! endpoints. Outcomes that are onboarding states rather than errors
//! (`not_configured`, `credentials_reset`) are reported in the response
//! envelope with a 200 so the UI can route the user to setup.

use crate::auth::extract_bearer_user;
use crate::config::CacheConfig;
use crate::gateway::{Gated, GatewayError, TrackerGateway};
use crate::tracker::{
    Activity, Issue, NewTimeEntry, Project, TimeEntry, TrackerError, WeeklySummary,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Open issues fetched per project
const ISSUE_LIMIT: u32 = 100;

/// Time entries fetched per week query; a week of bulk entry never
/// approaches this
const TIME_ENTRY_LIMIT: u32 = 200;

/// Shared application state for the tracker API
#[derive(Clone)]
pub struct TrackerAppState {
    pub gateway: Arc<TrackerGateway>,
    pub cache: CacheConfig,
}

/// Response envelope distinguishing a value from the onboarding states.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatedResponse<T> {
    Ok { data: T },
    /// No credentials saved yet
    NotConfigured,
    /// Stored credentials could not be decrypted and were removed
    CredentialsReset,
}

impl<T> From<Gated<T>> for GatedResponse<T> {
    fn from(g: Gated<T>) -> Self {
        match g {
            Gated::Value(v) => GatedResponse::Ok { data: v },
            Gated::NotConfigured => GatedResponse::NotConfigured,
            Gated::CredentialsHealed => GatedResponse::CredentialsReset,
        }
    }
}

/// Query parameters for GET /api/time-entries
#[derive(Deserialize)]
pub struct WeekQuery {
    /// Monday of the requested week, `YYYY-MM-DD`; defaults to the current week
    pub week_start: Option<String>,
}

/// Request body for POST /api/time-entries
#[derive(Deserialize)]
pub struct BulkTimeEntriesRequest {
    pub entries: Vec<NewTimeEntry>,
}

/// Successful bulk submission result
#[derive(Serialize)]
pub struct BulkTimeEntriesResponse {
    pub created: usize,
    pub entries: Vec<TimeEntry>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// Create the tracker API router
pub fn create_tracker_router(state: TrackerAppState) -> Router {
    Router::new()
        .route("/api/projects", get(list_projects))
        .route("/api/activities", get(list_activities))
        .route("/api/projects/:project_id/issues", get(list_issues))
        .route("/api/time-entries", get(weekly_time_entries))
        .route("/api/time-entries", post(create_time_entries))
        .route(
            "/api/time-entries/:id",
            put(update_time_entry).delete(delete_time_entry),
        )
        .with_state(Arc::new(state))
}

/// GET /api/projects - Projects the caller can log time against
async fn list_projects(
    State(state): State<Arc<TrackerAppState>>,
    headers: HeaderMap,
) -> Result<Json<GatedResponse<Vec<Project>>>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let result = state
        .gateway
        .fetch_cached(
            Some(&user_id),
            "projects",
            "projects",
            state.cache.projects_ttl(),
            |client, _uid| async move { client.projects().await },
        )
        .await?;

    Ok(Json(result.into()))
}

/// GET /api/activities - Time-entry activity enumeration
async fn list_activities(
    State(state): State<Arc<TrackerAppState>>,
    headers: HeaderMap,
) -> Result<Json<GatedResponse<Vec<Activity>>>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let result = state
        .gateway
        .fetch_cached(
            Some(&user_id),
            "activities",
            "activities",
            state.cache.activities_ttl(),
            |client, _uid| async move { client.activities().await },
        )
        .await?;

    Ok(Json(result.into()))
}

/// GET /api/projects/:project_id/issues - Open issues in one project
async fn list_issues(
    State(state): State<Arc<TrackerAppState>>,
    headers: HeaderMap,
    Path(project_id): Path<i64>,
) -> Result<Json<GatedResponse<Vec<Issue>>>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let result = state
        .gateway
        .fetch_cached(
            Some(&user_id),
            "issues",
            &format!("issues-{}", project_id),
            state.cache.issues_ttl(),
            |client, _uid| async move { client.issues(project_id, ISSUE_LIMIT).await },
        )
        .await?;

    Ok(Json(result.into()))
}

/// GET /api/time-entries?week_start=YYYY-MM-DD - One week of the caller's
/// entries with per-project and per-activity totals
async fn weekly_time_entries(
    State(state): State<Arc<TrackerAppState>>,
    headers: HeaderMap,
    Query(query): Query<WeekQuery>,
) -> Result<Json<GatedResponse<WeeklySummary>>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let week_start = resolve_week_start(query.week_start.as_deref())?;
    let from = week_start.format("%Y-%m-%d").to_string();
    let to = (week_start + ChronoDuration::days(6))
        .format("%Y-%m-%d")
        .to_string();

    // One cache entry per requested week; all weeks share the operation tag
    // so a bulk submission drops every cached week at once
    let result = state
        .gateway
        .fetch_cached(
            Some(&user_id),
            "time-entries",
            &format!("time-entries-{}", from),
            state.cache.time_entries_ttl(),
            |client, tracker_user_id| async move {
                let entries = client
                    .time_entries(&tracker_user_id, &from, &to, TIME_ENTRY_LIMIT)
                    .await?;
                Ok(WeeklySummary::from_entries(entries))
            },
        )
        .await?;

    Ok(Json(result.into()))
}

/// POST /api/time-entries - Bulk-create time entries
///
/// The whole batch is validated up front; nothing is sent to the tracker
/// unless every entry passes. Creation is sequential, and the time-entries
/// cache is purged afterwards so the next weekly read reflects the writes.
async fn create_time_entries(
    State(state): State<Arc<TrackerAppState>>,
    headers: HeaderMap,
    Json(body): Json<BulkTimeEntriesRequest>,
) -> Result<Json<GatedResponse<BulkTimeEntriesResponse>>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let errors = validate_entries(&body.entries);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let entries = body.entries;
    let result = state
        .gateway
        .with_client(Some(&user_id), |client, _uid| async move {
            let mut created = Vec::with_capacity(entries.len());
            for entry in &entries {
                created.push(client.create_time_entry(entry).await?);
            }
            Ok(created)
        })
        .await;

    // A tracker error mid-batch still leaves the earlier creates recorded
    // upstream, so cached weekly reads are stale whenever any create was
    // attempted — invalidate on that path too, not just on full success
    if matches!(&result, Ok(Gated::Value(_)) | Err(GatewayError::Tracker(_))) {
        state
            .gateway
            .invalidate_operation(Some(&user_id), "time-entries")
            .await;
    }

    let result = match result? {
        Gated::Value(created) => Gated::Value(BulkTimeEntriesResponse {
            created: created.len(),
            entries: created,
        }),
        Gated::NotConfigured => Gated::NotConfigured,
        Gated::CredentialsHealed => Gated::CredentialsHealed,
    };

    Ok(Json(result.into()))
}

/// PUT /api/time-entries/:id - Replace one existing entry
async fn update_time_entry(
    State(state): State<Arc<TrackerAppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(entry): Json<NewTimeEntry>,
) -> Result<Json<GatedResponse<()>>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let errors = validate_entries(std::slice::from_ref(&entry));
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let result = state
        .gateway
        .with_client(Some(&user_id), |client, _uid| async move {
            client.update_time_entry(id, &entry).await
        })
        .await;

    // A transport error can mask a write that landed; treat any attempted
    // mutation as cache-poisoning
    if matches!(&result, Ok(Gated::Value(())) | Err(GatewayError::Tracker(_))) {
        state
            .gateway
            .invalidate_operation(Some(&user_id), "time-entries")
            .await;
    }

    Ok(Json(result?.into()))
}

/// DELETE /api/time-entries/:id - Remove one entry
async fn delete_time_entry(
    State(state): State<Arc<TrackerAppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<GatedResponse<()>>, AppError> {
    let user_id = extract_bearer_user(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let result = state
        .gateway
        .with_client(Some(&user_id), |client, _uid| async move {
            client.delete_time_entry(id).await
        })
        .await;

    if matches!(&result, Ok(Gated::Value(())) | Err(GatewayError::Tracker(_))) {
        state
            .gateway
            .invalidate_operation(Some(&user_id), "time-entries")
            .await;
    }

    Ok(Json(result?.into()))
}

/// Resolve the requested week start, defaulting to the current week's Monday.
fn resolve_week_start(raw: Option<&str>) -> Result<NaiveDate, AppError> {
    match raw {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            AppError::BadRequest(format!("Invalid week_start '{}', expected YYYY-MM-DD", raw))
        }),
        None => {
            let today = Utc::now().date_naive();
            Ok(today - ChronoDuration::days(today.weekday().num_days_from_monday() as i64))
        }
    }
}

/// Validate a bulk submission, collecting every problem instead of stopping
/// at the first one.
fn validate_entries(entries: &[NewTimeEntry]) -> Vec<String> {
    let mut errors = Vec::new();

    if entries.is_empty() {
        errors.push("At least one time entry is required".to_string());
        return errors;
    }

    for (i, entry) in entries.iter().enumerate() {
        let n = i + 1;
        if NaiveDate::parse_from_str(&entry.spent_on, "%Y-%m-%d").is_err() {
            errors.push(format!(
                "Entry {}: invalid date '{}', expected YYYY-MM-DD",
                n, entry.spent_on
            ));
        }
        if !(entry.hours > 0.0) {
            errors.push(format!("Entry {}: hours must be greater than zero", n));
        } else if entry.hours > 24.0 {
            errors.push(format!("Entry {}: hours must not exceed 24", n));
        }
        if entry.project_id <= 0 {
            errors.push(format!("Entry {}: project_id is required", n));
        }
        if entry.activity_id <= 0 {
            errors.push(format!("Entry {}: activity_id is required", n));
        }
    }

    errors
}

/// Application error types
#[derive(Debug)]
pub(crate) enum AppError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Validation(Vec<String>),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, errors) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, Vec::new()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, Vec::new()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, Vec::new()),
            AppError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation failed".to_string(),
                errors,
            ),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg, Vec::new()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, Vec::new()),
        };

        (status, Json(ErrorResponse { error, errors })).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unauthenticated => AppError::Unauthorized(e.to_string()),
            GatewayError::Vault(e) => {
                warn!(error = %e, "Vault failure in tracker API");
                AppError::Internal("Failed to access credential storage".to_string())
            }
            GatewayError::Tracker(TrackerError::Unauthorized) => {
                AppError::Unauthorized("Tracker rejected the stored API key".to_string())
            }
            GatewayError::Tracker(TrackerError::NotFound(what)) => AppError::NotFound(what),
            GatewayError::Tracker(TrackerError::Validation(errors)) => {
                AppError::Validation(errors)
            }
            GatewayError::Tracker(e) => {
                warn!(error = %e, "Tracker failure in tracker API");
                AppError::Upstream("Tracker request failed".to_string())
            }
        }
    }
}
