//! Health, readiness, and root endpoints.
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): 200 whenever the process can answer
//! - **Readiness** (`/ready`): 503 until the document store answers a ping

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::models::{HealthResponse, MessageResponse, ReadyResponse};
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "ok",
///   "env": "development",
///   "version": "0.1.0",
///   "timestamp": "2026-01-15T10:30:00Z",
///   "uptime_seconds": 42
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        env: state.config.app_env.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Readiness check endpoint for orchestrators.
///
/// Returns 503 while the project store is unreachable or closed.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                store: true,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed: store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    store: false,
                }),
            )
        }
    }
}

pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "CineForge AI API is running. Visit /docs for the Swagger UI.".to_string(),
    })
}
