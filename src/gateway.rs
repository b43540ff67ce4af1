//! The ordered middleware chain every request passes through.
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │      CORS        │ ← OPTIONS answered here (200), nothing below runs
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-Id on request and response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Request Logger  │ ← exactly one record per request
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiter    │ ← 429 when the client's window is full
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Auth Guard     │ ← 401 unless exempt or carrying a valid token
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! The chain is built once from [`Config`] and applied with
//! [`Gateway::apply`]. Axum runs the most recently added layer first, so
//! `apply` adds them innermost to outermost.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::config::{Config, RateLimitKeySource};
use crate::error::{AppError, AppResult};
use crate::middleware::{
    ClientKeyResolver, ExemptPathSet, JwtAuthLayer, RateLimitLayer, RequestIdLayer,
    RequestLogLayer, SlidingWindowStore,
};
use crate::token::TokenCodec;

/// Cross-origin policy, validated before any `CorsLayer` is built.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
}

impl CorsPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_origins: config.cors_allowed_origins.clone(),
            allowed_methods: config.cors_allowed_methods.clone(),
            allowed_headers: config.cors_allowed_headers.clone(),
            allow_credentials: config.cors_allow_credentials,
        }
    }

    /// Build the tower-http layer.
    ///
    /// `*` in methods or headers means "echo whatever the preflight asked
    /// for", which is the only wildcard form allowed alongside credentials.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` for a wildcard origin with credentials or any
    /// entry that is not a valid origin, method, or header name.
    pub fn build(&self) -> AppResult<CorsLayer> {
        let any_origin = self.allowed_origins.iter().any(|o| o == "*");
        if any_origin && self.allow_credentials {
            return Err(AppError::ConfigError(
                "wildcard CORS origin cannot be combined with credentials".to_string(),
            ));
        }

        let origin = if any_origin {
            AllowOrigin::any()
        } else {
            let origins = self
                .allowed_origins
                .iter()
                .map(|o| {
                    HeaderValue::from_str(o).map_err(|_| {
                        AppError::ConfigError(format!("invalid CORS origin `{o}`"))
                    })
                })
                .collect::<AppResult<Vec<_>>>()?;
            AllowOrigin::list(origins)
        };

        let methods = if self.allowed_methods.iter().any(|m| m == "*") {
            if self.allow_credentials {
                AllowMethods::mirror_request()
            } else {
                AllowMethods::any()
            }
        } else {
            let methods = self
                .allowed_methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                        AppError::ConfigError(format!("invalid CORS method `{m}`"))
                    })
                })
                .collect::<AppResult<Vec<_>>>()?;
            AllowMethods::list(methods)
        };

        let headers = if self.allowed_headers.iter().any(|h| h == "*") {
            if self.allow_credentials {
                AllowHeaders::mirror_request()
            } else {
                AllowHeaders::any()
            }
        } else {
            let headers = self
                .allowed_headers
                .iter()
                .map(|h| {
                    HeaderName::from_bytes(h.to_ascii_lowercase().as_bytes()).map_err(|_| {
                        AppError::ConfigError(format!("invalid CORS header `{h}`"))
                    })
                })
                .collect::<AppResult<Vec<_>>>()?;
            AllowHeaders::list(headers)
        };

        Ok(CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(self.allow_credentials))
    }
}

/// The composed request gateway.
#[derive(Clone)]
pub struct Gateway {
    cors: CorsLayer,
    rate_limit: Option<RateLimitLayer>,
    auth: JwtAuthLayer,
    max_request_body_size: usize,
}

impl Gateway {
    /// Build every layer from configuration.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` if any part of the configuration is unusable.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        config.validate()?;

        let cors = CorsPolicy::from_config(config).build()?;

        let resolver = Arc::new(ClientKeyResolver::new(
            config.rate_limit_key_source,
            &config.trusted_proxies,
        )?);
        if config.rate_limit_key_source == RateLimitKeySource::Forwarded
            && !config.proxy_validation_enabled()
        {
            warn!(
                "RATE_LIMIT_KEY_SOURCE=forwarded without TRUSTED_PROXIES: \
                 forwarding headers from any peer are honoured"
            );
        }

        let rate_limit = if config.rate_limiting_enabled() {
            let store = SlidingWindowStore::new(
                config.rate_limit_window,
                config.rate_limit_max_requests,
                config.rate_limit_max_keys,
            )
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
            info!(
                window_secs = config.rate_limit_window.as_secs(),
                max_requests = config.rate_limit_max_requests,
                max_keys = config.rate_limit_max_keys,
                key_source = %config.rate_limit_key_source,
                trusted_proxies = config.trusted_proxies.len(),
                "Rate limiting enabled"
            );
            Some(RateLimitLayer::new(Arc::new(store), resolver.clone()))
        } else {
            info!("Rate limiting disabled (RATE_LIMIT_MAX_REQUESTS=0)");
            None
        };

        let codec = TokenCodec::new(&config.jwt_secret, config.jwt_algorithm, config.jwt_leeway)?;
        let exempt = ExemptPathSet::new(&config.auth_exempt_paths);
        info!(
            algorithm = ?config.jwt_algorithm,
            exempt_paths = ?config.auth_exempt_paths,
            failure_limit_per_minute = config.auth_failure_limit_per_minute,
            "Bearer token authentication enabled"
        );
        // Failed-auth counters share the limiter's key cap
        let auth = JwtAuthLayer::new(
            Arc::new(codec),
            exempt,
            resolver,
            config.auth_failure_limit_per_minute,
            config.rate_limit_max_keys,
        )
        .map_err(|e| AppError::ConfigError(e.to_string()))?;

        Ok(Self {
            cors,
            rate_limit,
            auth,
            max_request_body_size: config.max_request_body_size,
        })
    }

    /// The rate limiter's store, when rate limiting is enabled.
    pub fn rate_limit_store(&self) -> Option<&Arc<SlidingWindowStore>> {
        self.rate_limit.as_ref().map(RateLimitLayer::store)
    }

    /// Wrap `router` in the gateway chain.
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let mut router = router
            .layer(DefaultBodyLimit::max(self.max_request_body_size))
            .layer(self.auth.clone());

        if let Some(rate_limit) = &self.rate_limit {
            router = router.layer(rate_limit.clone());
        }

        router
            .layer(RequestLogLayer::new())
            .layer(RequestIdLayer::new())
            .layer(self.cors.clone())
    }
}
