use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Client-visible body for every authentication failure.
///
/// Missing header, malformed token, bad signature and expiry all map here so
/// a client cannot tell which check failed.
pub const UNAUTHENTICATED_DETAIL: &str = "Not authenticated.";

/// Client-visible body for admission-control rejections.
pub const RATE_LIMITED_DETAIL: &str = "Too many requests. Please try again later.";

/// Client-visible body for any 5xx.
pub const INTERNAL_DETAIL: &str = "Internal server error.";

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Gateway Errors
///
/// - `ConfigError` - fatal at startup, the process must not serve traffic
/// - `RateLimitExceeded` - admission control, client may retry after the window slides
/// - `Unauthenticated` - uniform 401; the carried reason is for server logs only
/// - `Internal` - anything unexpected; details never leave the process
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rate limit exceeded (retry after {retry_after_secs}s)")]
    RateLimitExceeded { retry_after_secs: u64, limit: u32 },

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Document store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            AppError::RateLimitExceeded {
                retry_after_secs,
                limit,
            } => {
                // Logged once where the rejection is decided
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    axum::Json(ErrorResponse {
                        detail: RATE_LIMITED_DETAIL.to_string(),
                    }),
                )
                    .into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
                headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
                return response;
            }
            AppError::Unauthenticated(reason) => {
                tracing::debug!(reason = %reason, "Request rejected as unauthenticated");
                let mut response = (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(ErrorResponse {
                        detail: UNAUTHENTICATED_DETAIL.to_string(),
                    }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                return response;
            }

            // Internal errors - never expose internal details to clients
            AppError::ConfigError(_) | AppError::Internal(_) | AppError::StoreError(_) => {
                tracing::error!(error = %self, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_DETAIL.to_string())
            }

            // Client errors - safe to show the message as it's user-facing
            AppError::SerializationError(e) => {
                tracing::debug!(error = %e, "Rejected request body");
                (StatusCode::BAD_REQUEST, sanitize_serde_error(e))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        (status, axum::Json(ErrorResponse { detail })).into_response()
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
