//! # CineForge Gateway
//!
//! The request gateway of the CineForge AI backend, built on Axum:
//!
//! - **CORS**: explicit origin allow-list, preflights answered at the edge
//! - **Observability**: request IDs, one structured log record per request,
//!   Prometheus metrics
//! - **Rate limiting**: per-client sliding window with a bounded key set
//! - **Authentication**: HMAC-signed bearer tokens, exempt path prefixes,
//!   uniform 401s and brute force throttling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Gateway (CORS → Request ID → Log → Rate Limit → Auth)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, me, projects)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ProjectStore (injected; MemoryStore in-process)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cineforge_gateway::{AppState, Config, MemoryStore, build_router};
//!
//! # fn main() -> Result<(), cineforge_gateway::AppError> {
//! let config = Config::from_env()?;
//! let state = AppState::new(Arc::new(MemoryStore::new()), config);
//! let app = build_router(state)?;
//! // axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! JWT_SECRET=change-me RATE_LIMIT_MAX_REQUESTS=100 RATE_LIMIT_WINDOW_SECS=60 cargo run
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod token;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use gateway::Gateway;
pub use middleware::RequestIdentity;
pub use routes::{build_router, build_router_with_gateway};
pub use state::AppState;
pub use store::{MemoryStore, ProjectStore};
pub use token::{IdentityClaims, TokenCodec};
