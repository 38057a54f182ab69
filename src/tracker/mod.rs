//! Tracker (Redmine-compatible) API types and error taxonomy.
//!
//! The tracker is an external collaborator: this module pins down the small
//! stable surface the rest of the service consumes — domain types mapped out
//! of the tracker's wire format, and a closed error enum so callers never
//! branch on raw HTTP status conventions.

mod client;

pub use client::{TrackerClient, TrackerVerifier};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tracker API failures, translated at the client boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// API key rejected (401-equivalent)
    Unauthorized,
    /// Resource does not exist (404-equivalent)
    NotFound(String),
    /// Request rejected with caller-displayable messages (422-equivalent)
    Validation(Vec<String>),
    /// Tracker-side failure (5xx)
    Server(u16),
    /// Transport-level failure, distinct from any HTTP response
    Network(String),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::Unauthorized => write!(f, "Invalid API key or unauthorized access"),
            TrackerError::NotFound(what) => write!(f, "Resource not found: {}", what),
            TrackerError::Validation(errors) => {
                write!(f, "Validation error: {}", errors.join(", "))
            }
            TrackerError::Server(status) => write!(f, "Tracker server error (status {})", status),
            TrackerError::Network(msg) => {
                write!(f, "Network error: unable to reach tracker: {}", msg)
            }
        }
    }
}

impl std::error::Error for TrackerError {}

/// A project the user can log time against.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub identifier: String,
}

/// A time-entry activity from the tracker's enumeration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

/// An open issue within a project.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: i64,
    pub subject: String,
    pub status: String,
    pub priority: String,
}

/// A recorded time entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimeEntry {
    pub id: i64,
    pub project_id: i64,
    pub activity_id: i64,
    pub activity_name: String,
    /// Date the time was spent on, `YYYY-MM-DD`
    pub spent_on: String,
    pub hours: f64,
    #[serde(default)]
    pub comments: String,
}

/// A time entry to be created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTimeEntry {
    pub project_id: i64,
    pub activity_id: i64,
    pub spent_on: String,
    pub hours: f64,
    #[serde(default)]
    pub comments: String,
}

/// Aggregated view of one week of time entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeeklySummary {
    pub entries: Vec<TimeEntry>,
    pub total_hours: f64,
    pub by_project: HashMap<i64, f64>,
    pub by_activity: HashMap<i64, f64>,
}

impl WeeklySummary {
    /// Sums totals per project and per activity over `entries`.
    pub fn from_entries(entries: Vec<TimeEntry>) -> Self {
        let mut total_hours = 0.0;
        let mut by_project: HashMap<i64, f64> = HashMap::new();
        let mut by_activity: HashMap<i64, f64> = HashMap::new();

        for entry in &entries {
            total_hours += entry.hours;
            *by_project.entry(entry.project_id).or_insert(0.0) += entry.hours;
            *by_activity.entry(entry.activity_id).or_insert(0.0) += entry.hours;
        }

        Self {
            entries,
            total_hours,
            by_project,
            by_activity,
        }
    }
}
