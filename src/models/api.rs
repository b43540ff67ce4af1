use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request to create a new project.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProjectRequest {
    /// Display title (trimmed, 1-200 characters)
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process can answer
    pub status: String,
    /// Deployment environment name (`APP_ENV`)
    pub env: String,
    /// Application version
    pub version: String,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
}

/// Readiness check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
    /// Whether the document store answered its ping
    pub store: bool,
}

/// Response for the root endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// The authenticated caller as seen by the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub id: String,
    /// Token expiry, seconds since the Unix epoch
    pub expires_at: i64,
    /// Remaining claims carried by the token
    pub claims: Map<String, Value>,
}
