//! Application routing.
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - Health & monitoring (exempt from auth by default)
//! - `/` - Banner
//! - `/me` - The authenticated caller
//! - `/projects` - Owner-scoped project documents
//!
//! Every route, including the fallback, runs behind the gateway chain
//! described in [`crate::gateway`].

use axum::Router;
use axum::routing::get;

use crate::error::{AppError, AppResult};
use crate::gateway::Gateway;
use crate::handlers;
use crate::state::AppState;

/// Build the application router with the gateway applied.
///
/// # Errors
///
/// Returns `AppError::ConfigError` if the gateway cannot be built from the
/// state's configuration.
pub fn build_router(state: AppState) -> AppResult<Router> {
    let gateway = Gateway::from_config(&state.config)?;
    Ok(build_router_with_gateway(state, &gateway))
}

/// Build the router around an already constructed gateway.
pub fn build_router_with_gateway(state: AppState, gateway: &Gateway) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/", get(handlers::root))
        .route("/me", get(handlers::me))
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/{id}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .fallback(not_found);

    gateway.apply(router).with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("Not found.".to_string())
}
