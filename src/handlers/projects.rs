//! Owner-scoped project endpoints.
//!
//! All handlers require a [`RequestIdentity`]; its id is the owner every
//! store call is scoped by.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::middleware::RequestIdentity;
use crate::models::{CreateProjectRequest, Project};
use crate::state::AppState;
use crate::validation::{PROJECT_NOT_FOUND, parse_project_id, validate_new_project};

/// List the caller's projects, newest first.
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn list_projects(
    State(state): State<AppState>,
    identity: RequestIdentity,
) -> AppResult<Json<Vec<Project>>> {
    let projects = state.store.list_projects(&identity.id).await?;
    Ok(Json(projects))
}

/// Create a project owned by the caller.
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn create_project(
    State(state): State<AppState>,
    identity: RequestIdentity,
    body: Bytes,
) -> AppResult<(StatusCode, Json<Project>)> {
    // Parsed by hand so malformed bodies get the same sanitized `detail` shape
    let payload: CreateProjectRequest = serde_json::from_slice(&body)?;
    let project = validate_new_project(payload)?;
    let created = state.store.create_project(&identity.id, project).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Get one of the caller's projects.
#[instrument(skip(state, identity), fields(user_id = %identity.id))]
pub async fn get_project(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(id): Path<String>,
) -> AppResult<Json<Project>> {
    let id = parse_project_id(&id)?;

    state
        .store
        .get_project(id, &identity.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(PROJECT_NOT_FOUND.to_string()))
}

/// Delete one of the caller's projects.
#[instrument(skip(state, identity), fields(user_id = %identity.id))]
pub async fn delete_project(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_project_id(&id)?;

    if state.store.delete_project(id, &identity.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(PROJECT_NOT_FOUND.to_string()))
    }
}
