//! HTTP client for the tracker's REST API.
//!
//! Thin pass-through over the Redmine wire conventions: API key in the
//! `X-Redmine-API-Key` header, `.json` endpoints, `{ "time_entry": {...} }`
//! envelopes. Every request carries an explicit timeout, and all failures
//! are translated into [`TrackerError`] here so callers never see raw
//! status codes.

use super::{Activity, Issue, NewTimeEntry, Project, TimeEntry, TrackerError};
use crate::credentials::{KeyVerifier, VaultError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

/// Timeout for every outbound tracker call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const API_KEY_HEADER: &str = "X-Redmine-API-Key";

/// Per-call client bound to one endpoint and one decrypted API key.
///
/// Construction is cheap; the gateway builds one per request from a closure
/// that captures only `base_url` and the decrypted key.
pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TrackerClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction with static options");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// GET `my/account` — resolves the tracker's own user id for this key.
    /// Used only at credential save time.
    pub async fn current_user(&self) -> Result<String, TrackerError> {
        let body: AccountResponse = self.get("/my/account.json", &[]).await?;
        Ok(body.user.id.to_string())
    }

    pub async fn projects(&self) -> Result<Vec<Project>, TrackerError> {
        let body: ProjectsResponse = self.get("/projects.json", &[]).await?;
        Ok(body
            .projects
            .into_iter()
            .map(|p| Project {
                id: p.id,
                name: p.name,
                identifier: p.identifier,
            })
            .collect())
    }

    pub async fn activities(&self) -> Result<Vec<Activity>, TrackerError> {
        let body: ActivitiesResponse = self
            .get("/enumerations/time_entry_activities.json", &[])
            .await?;
        Ok(body
            .time_entry_activities
            .into_iter()
            .map(|a| Activity {
                id: a.id,
                name: a.name,
                is_default: a.is_default.unwrap_or(false),
            })
            .collect())
    }

    /// Open issues in a project, most recently updated first.
    pub async fn issues(&self, project_id: i64, limit: u32) -> Result<Vec<Issue>, TrackerError> {
        let body: IssuesResponse = self
            .get(
                "/issues.json",
                &[
                    ("project_id", project_id.to_string()),
                    ("status_id", "open".to_string()),
                    ("sort", "updated_on:desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(body
            .issues
            .into_iter()
            .map(|i| Issue {
                id: i.id,
                subject: i.subject,
                status: i.status.name,
                priority: i.priority.name,
            })
            .collect())
    }

    /// Time entries for a tracker user between `from` and `to` (inclusive,
    /// `YYYY-MM-DD`).
    pub async fn time_entries(
        &self,
        tracker_user_id: &str,
        from: &str,
        to: &str,
        limit: u32,
    ) -> Result<Vec<TimeEntry>, TrackerError> {
        let body: TimeEntriesResponse = self
            .get(
                "/time_entries.json",
                &[
                    ("user_id", tracker_user_id.to_string()),
                    ("from", from.to_string()),
                    ("to", to.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(body.time_entries.into_iter().map(WireTimeEntry::into_entry).collect())
    }

    pub async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<TimeEntry, TrackerError> {
        let url = format!("{}/time_entries.json", self.base_url);
        let payload = json!({
            "time_entry": {
                "project_id": entry.project_id,
                "activity_id": entry.activity_id,
                "spent_on": entry.spent_on,
                "hours": entry.hours,
                "comments": entry.comments,
            }
        });

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let body: TimeEntryResponse = Self::parse(response, "/time_entries.json").await?;
        Ok(body.time_entry.into_entry())
    }

    /// Full replace of an existing entry. The tracker replies 204 on success.
    pub async fn update_time_entry(
        &self,
        id: i64,
        entry: &NewTimeEntry,
    ) -> Result<(), TrackerError> {
        let path = format!("/time_entries/{}.json", id);
        let url = format!("{}{}", self.base_url, path);
        let payload = json!({
            "time_entry": {
                "project_id": entry.project_id,
                "activity_id": entry.activity_id,
                "spent_on": entry.spent_on,
                "hours": entry.hours,
                "comments": entry.comments,
            }
        });

        let response = self
            .http
            .put(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(map_status(response.status(), &path, response.text().await.unwrap_or_default()))
    }

    pub async fn delete_time_entry(&self, id: i64) -> Result<(), TrackerError> {
        let path = format!("/time_entries/{}.json", id);
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(map_status(response.status(), &path, response.text().await.unwrap_or_default()))
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, TrackerError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(map_transport_error)?;

        Self::parse(response, path).await
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        path: &str,
    ) -> Result<T, TrackerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = map_status(status, path, body);
            warn!(endpoint = %path, status = %status, error = %err, "Tracker API error");
            return Err(err);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TrackerError::Network(format!("invalid response body: {}", e)))
    }
}

fn map_transport_error(e: reqwest::Error) -> TrackerError {
    if e.is_timeout() {
        TrackerError::Network("request timed out".to_string())
    } else {
        TrackerError::Network(e.to_string())
    }
}

/// Maps the tracker's HTTP conventions onto the closed taxonomy.
fn map_status(status: StatusCode, path: &str, body: String) -> TrackerError {
    match status.as_u16() {
        401 | 403 => TrackerError::Unauthorized,
        404 => TrackerError::NotFound(path.to_string()),
        422 => {
            #[derive(Deserialize)]
            struct ErrorBody {
                #[serde(default)]
                errors: Vec<String>,
            }
            let errors = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.errors)
                .unwrap_or_default();
            if errors.is_empty() {
                TrackerError::Validation(vec!["Invalid data".to_string()])
            } else {
                TrackerError::Validation(errors)
            }
        }
        s => TrackerError::Server(s),
    }
}

/// Production [`KeyVerifier`]: round-trips the raw key against the tracker's
/// account endpoint to resolve the tracker-side user id.
pub struct TrackerVerifier;

#[async_trait]
impl KeyVerifier for TrackerVerifier {
    async fn verify(&self, base_url: &str, api_key: &str) -> Result<String, VaultError> {
        TrackerClient::new(base_url, api_key)
            .current_user()
            .await
            .map_err(|e| VaultError::Verification(e.to_string()))
    }
}

// Wire format

#[derive(Deserialize)]
struct AccountResponse {
    user: WireUser,
}

#[derive(Deserialize)]
struct WireUser {
    id: i64,
}

#[derive(Deserialize)]
struct ProjectsResponse {
    #[serde(default)]
    projects: Vec<WireProject>,
}

#[derive(Deserialize)]
struct WireProject {
    id: i64,
    name: String,
    identifier: String,
}

#[derive(Deserialize)]
struct ActivitiesResponse {
    #[serde(default)]
    time_entry_activities: Vec<WireActivity>,
}

#[derive(Deserialize)]
struct WireActivity {
    id: i64,
    name: String,
    #[serde(default)]
    is_default: Option<bool>,
}

#[derive(Deserialize)]
struct IssuesResponse {
    #[serde(default)]
    issues: Vec<WireIssue>,
}

#[derive(Deserialize)]
struct WireIssue {
    id: i64,
    subject: String,
    status: WireNamed,
    priority: WireNamed,
}

#[derive(Deserialize)]
struct WireNamed {
    name: String,
}

#[derive(Deserialize)]
struct TimeEntriesResponse {
    #[serde(default)]
    time_entries: Vec<WireTimeEntry>,
}

#[derive(Deserialize)]
struct TimeEntryResponse {
    time_entry: WireTimeEntry,
}

#[derive(Deserialize)]
struct WireTimeEntry {
    id: i64,
    project: WireRef,
    activity: WireRef,
    spent_on: String,
    hours: f64,
    #[serde(default)]
    comments: String,
}

#[derive(Deserialize)]
struct WireRef {
    id: i64,
    #[serde(default)]
    name: String,
}

impl WireTimeEntry {
    fn into_entry(self) -> TimeEntry {
        TimeEntry {
            id: self.id,
            project_id: self.project.id,
            activity_id: self.activity.id,
            activity_name: self.activity.name,
            spent_on: self.spent_on,
            hours: self.hours,
            comments: self.comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_response_deserialization() {
        let json = r#"{"user": {"id": 42, "login": "jdoe", "mail": "jdoe@example.com"}}"#;
        let response: AccountResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.user.id, 42);
    }

    #[test]
    fn test_time_entries_deserialization() {
        let json = r#"{
            "time_entries": [{
                "id": 7,
                "project": {"id": 1, "name": "Platform"},
                "activity": {"id": 9, "name": "Development"},
                "spent_on": "2025-01-06",
                "hours": 2.5,
                "comments": "Code review"
            }],
            "total_count": 1
        }"#;

        let response: TimeEntriesResponse = serde_json::from_str(json).unwrap();
        let entry = response.time_entries.into_iter().next().unwrap().into_entry();
        assert_eq!(entry.project_id, 1);
        assert_eq!(entry.activity_name, "Development");
        assert_eq!(entry.hours, 2.5);
    }

    #[test]
    fn test_activities_default_flag_optional() {
        let json = r#"{"time_entry_activities": [{"id": 9, "name": "Development"}]}"#;
        let response: ActivitiesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.time_entry_activities[0].is_default, None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_status(StatusCode::UNAUTHORIZED, "/projects.json", String::new()),
            TrackerError::Unauthorized
        );
        assert_eq!(
            map_status(StatusCode::NOT_FOUND, "/issues/9.json", String::new()),
            TrackerError::NotFound("/issues/9.json".to_string())
        );
        assert_eq!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR, "/projects.json", String::new()),
            TrackerError::Server(500)
        );
    }

    #[test]
    fn test_validation_errors_extracted_from_body() {
        let body = r#"{"errors": ["Hours is invalid", "Activity cannot be blank"]}"#;
        assert_eq!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, "/time_entries.json", body.to_string()),
            TrackerError::Validation(vec![
                "Hours is invalid".to_string(),
                "Activity cannot be blank".to_string()
            ])
        );

        // Unparseable body still yields a displayable message
        assert_eq!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, "/time_entries.json", "oops".to_string()),
            TrackerError::Validation(vec!["Invalid data".to_string()])
        );
    }
}
