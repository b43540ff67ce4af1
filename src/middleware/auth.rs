//! Bearer-token authentication middleware.
//!
//! # Flow
//!
//! 1. Exempt path (see [`ExemptPathSet`]) → passed downstream with no identity
//! 2. Client throttled for repeated bad tokens → 429, no token work done
//! 3. No `Authorization: Bearer <token>` → 401
//! 4. Token fails verification → 401, failure counted against the client
//! 5. Otherwise a [`RequestIdentity`] is attached to the request extensions
//!
//! Every 401 has the same body and headers. The precise cause (`expired`,
//! `invalid_signature`, ...) is logged and counted server-side only.
//!
//! # Brute Force Protection
//!
//! Failed verifications are counted per client key in a one-minute
//! [`SlidingWindowStore`] holding `AUTH_FAILURE_LIMIT_PER_MINUTE` entries, so
//! the failure counters get the same key cap and eviction as the rate
//! limiter. Once a client has that many failures in the last minute, every
//! non-exempt request from it is refused with 429 until the oldest ages out.

use std::convert::Infallible;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum::http::{Request, Response, header};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{Span, debug, info, warn};

use super::ip::ClientKeyResolver;
use super::rate_limit::{RateLimitError, SlidingWindowStore, whole_secs};
use crate::error::AppError;
use crate::metrics;
use crate::token::{IdentityClaims, TokenCodec};

/// Window over which failed verifications are counted.
const FAILURE_WINDOW: Duration = Duration::from_secs(60);

// =============================================================================
// Exempt Paths
// =============================================================================

/// Path prefixes that bypass authentication.
///
/// Matching is exact-or-prefix on segment boundaries:
/// - `/auth` matches `/auth` and `/auth/login`, but not `/authority`
/// - `/` matches only `/`
/// - a trailing slash on a configured prefix is ignored
///
/// Matching is case-sensitive and runs on the raw URI path (query excluded).
#[derive(Debug, Clone, Default)]
pub struct ExemptPathSet {
    prefixes: Vec<String>,
}

impl ExemptPathSet {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .filter_map(|p| {
                let p = p.as_ref().trim();
                if !p.starts_with('/') {
                    return None;
                }
                let trimmed = p.trim_end_matches('/');
                Some(if trimmed.is_empty() {
                    "/".to_string()
                } else {
                    trimmed.to_string()
                })
            })
            .collect();

        Self { prefixes }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            if prefix == "/" {
                return path == "/";
            }
            match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

// =============================================================================
// Identity
// =============================================================================

/// The authenticated caller, attached by [`JwtAuthLayer`].
///
/// Use as an extractor on protected handlers (401 when absent), or as
/// `Option<RequestIdentity>` on exempt handlers that serve both.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestIdentity {
    pub id: String,
    pub claims: IdentityClaims,
}

impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("no identity on request".to_string()))
    }
}

impl<S> OptionalFromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<RequestIdentity>().cloned())
    }
}

// =============================================================================
// Layer
// =============================================================================

/// JWT authentication layer.
#[derive(Clone)]
pub struct JwtAuthLayer {
    codec: Arc<TokenCodec>,
    exempt: Arc<ExemptPathSet>,
    resolver: Arc<ClientKeyResolver>,
    failures: Option<Arc<FailureThrottle>>,
}

impl JwtAuthLayer {
    /// Create a new auth layer.
    ///
    /// `failure_limit_per_minute = 0` disables brute force protection.
    /// At most `max_tracked_clients` clients have failures remembered.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::ZeroKeys`] if `max_tracked_clients` is zero while
    /// brute force protection is enabled.
    pub fn new(
        codec: Arc<TokenCodec>,
        exempt: ExemptPathSet,
        resolver: Arc<ClientKeyResolver>,
        failure_limit_per_minute: u32,
        max_tracked_clients: usize,
    ) -> Result<Self, RateLimitError> {
        let failures = NonZeroU32::new(failure_limit_per_minute)
            .map(|limit| FailureThrottle::new(limit, max_tracked_clients).map(Arc::new))
            .transpose()?;

        Ok(Self {
            codec,
            exempt: Arc::new(exempt),
            resolver,
            failures,
        })
    }

    pub fn exempt_paths(&self) -> &ExemptPathSet {
        &self.exempt
    }
}

impl<S> Layer<S> for JwtAuthLayer {
    type Service = JwtAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JwtAuthService {
            inner,
            codec: self.codec.clone(),
            exempt: self.exempt.clone(),
            resolver: self.resolver.clone(),
            failures: self.failures.clone(),
        }
    }
}

/// JWT authentication service wrapper.
#[derive(Clone)]
pub struct JwtAuthService<S> {
    inner: S,
    codec: Arc<TokenCodec>,
    exempt: Arc<ExemptPathSet>,
    resolver: Arc<ClientKeyResolver>,
    failures: Option<Arc<FailureThrottle>>,
}

impl<S> JwtAuthService<S> {
    /// Decide synchronously; `Ok` carries the identity to attach.
    fn authenticate(&self, req: &Request<Body>) -> Result<RequestIdentity, AppError> {
        let client_key = self.resolver.resolve(req);

        if let Some(failures) = &self.failures
            && let Some(retry_after_secs) = failures.blocked_for(&client_key)
        {
            info!(
                client_key = %client_key,
                retry_after_secs,
                limit = failures.limit,
                "Request rejected after repeated auth failures"
            );
            metrics::record_rate_limited();
            return Err(AppError::RateLimitExceeded {
                retry_after_secs,
                limit: failures.limit,
            });
        }

        let Some(token) = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
        else {
            debug!(path = %req.uri().path(), "Missing bearer token");
            metrics::record_auth_failure("missing");
            return Err(AppError::Unauthenticated("missing bearer token".to_string()));
        };

        match self.codec.verify(token) {
            Ok(claims) => Ok(RequestIdentity {
                id: claims.sub.clone(),
                claims,
            }),
            Err(e) => {
                let reason = e.reason();
                warn!(
                    path = %req.uri().path(),
                    client_key = %client_key,
                    reason,
                    "Token verification failed"
                );
                metrics::record_auth_failure(reason);
                if let Some(failures) = &self.failures {
                    failures.record(&client_key);
                }
                Err(AppError::Unauthenticated(e.to_string()))
            }
        }
    }
}

impl<S> Service<Request<Body>> for JwtAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if self.exempt.is_exempt(req.uri().path()) {
            debug!(path = %req.uri().path(), "Bypassing auth for exempt path");
            return Box::pin(async move { inner.call(req).await });
        }

        match self.authenticate(&req) {
            Ok(identity) => {
                Span::current().record("user_id", identity.id.as_str());
                req.extensions_mut().insert(identity);
                Box::pin(async move { inner.call(req).await })
            }
            Err(rejection) => Box::pin(async move { Ok(rejection.into_response()) }),
        }
    }
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is case-insensitive; the token must be a single non-empty word.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

// =============================================================================
// Failure Throttle
// =============================================================================

/// Counts failed verifications per client; blocks a client once its quota is spent.
struct FailureThrottle {
    failures: SlidingWindowStore,
    limit: u32,
}

impl FailureThrottle {
    fn new(limit: NonZeroU32, max_keys: usize) -> Result<Self, RateLimitError> {
        let failures =
            SlidingWindowStore::new(FAILURE_WINDOW, limit.get(), max_keys)?.with_label("auth_failures");
        Ok(Self {
            failures,
            limit: limit.get(),
        })
    }

    /// Seconds left on a block, or `None` if the client may proceed.
    fn blocked_for(&self, key: &str) -> Option<u64> {
        self.failures.retry_after(key).map(whole_secs)
    }

    fn record(&self, key: &str) {
        self.failures.check(key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use jsonwebtoken::Algorithm;

    #[test]
    fn test_exempt_prefix_matches_on_segment_boundary() {
        let exempt = ExemptPathSet::new(["/auth", "/health"]);

        assert!(exempt.is_exempt("/auth"));
        assert!(exempt.is_exempt("/auth/login"));
        assert!(exempt.is_exempt("/health"));
        assert!(!exempt.is_exempt("/authority"));
        assert!(!exempt.is_exempt("/healthz"));
        assert!(!exempt.is_exempt("/projects"));
    }

    #[test]
    fn test_exempt_root_matches_only_root() {
        let exempt = ExemptPathSet::new(["/"]);

        assert!(exempt.is_exempt("/"));
        assert!(!exempt.is_exempt("/projects"));
    }

    #[test]
    fn test_exempt_trailing_slash_ignored() {
        let exempt = ExemptPathSet::new(["/docs/"]);

        assert!(exempt.is_exempt("/docs"));
        assert!(exempt.is_exempt("/docs/index.html"));
        assert!(!exempt.is_exempt("/docsearch"));
    }

    #[test]
    fn test_exempt_is_case_sensitive_and_skips_relative() {
        let exempt = ExemptPathSet::new(["health", "/Auth"]);

        assert_eq!(exempt.len(), 1);
        assert!(!exempt.is_exempt("/auth"));
        assert!(exempt.is_exempt("/Auth/x"));
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(parse_bearer("bearer   tok"), Some("tok"));
        assert_eq!(parse_bearer("BEARER tok "), Some("tok"));
        assert_eq!(parse_bearer("Basic dXNlcjpwYXNz"), None);
        assert_eq!(parse_bearer("Bearer"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Bearer a b"), None);
        assert_eq!(parse_bearer(""), None);
    }

    #[test]
    fn test_failure_throttle_blocks_after_limit() {
        let throttle = FailureThrottle::new(NonZeroU32::new(2).unwrap(), 100).unwrap();

        assert_eq!(throttle.blocked_for("1.2.3.4"), None);
        throttle.record("1.2.3.4");
        assert_eq!(throttle.blocked_for("1.2.3.4"), None);

        throttle.record("1.2.3.4");
        let blocked = throttle.blocked_for("1.2.3.4").unwrap();
        assert!((1..=60).contains(&blocked));
        assert_eq!(throttle.blocked_for("5.6.7.8"), None);
    }

    #[test]
    fn test_failure_throttle_memory_is_capped() {
        let max_keys = 500;
        let throttle = FailureThrottle::new(NonZeroU32::new(1).unwrap(), max_keys).unwrap();

        for i in 0..max_keys * 20 {
            let key = format!("10.{}.{}.{}", i >> 16 & 0xff, i >> 8 & 0xff, i & 0xff);
            throttle.record(&key);
            throttle.record(&key);
        }

        assert_eq!(throttle.failures.tracked_keys(), max_keys);

        // The newest offenders are still blocked
        let last = max_keys * 20 - 1;
        let key = format!("10.{}.{}.{}", last >> 16 & 0xff, last >> 8 & 0xff, last & 0xff);
        assert!(throttle.blocked_for(&key).is_some());
    }

    #[test]
    fn test_blocked_check_does_not_track_clients() {
        let throttle = FailureThrottle::new(NonZeroU32::new(3).unwrap(), 100).unwrap();

        for i in 0..50 {
            assert_eq!(throttle.blocked_for(&format!("192.0.2.{i}")), None);
        }
        assert_eq!(throttle.failures.tracked_keys(), 0);
    }

    fn service() -> JwtAuthService<()> {
        let codec = TokenCodec::new("auth-test", Algorithm::HS256, Duration::ZERO).unwrap();
        let layer = JwtAuthLayer::new(
            Arc::new(codec),
            ExemptPathSet::new(["/health"]),
            Arc::new(ClientKeyResolver::default()),
            0,
            100,
        )
        .unwrap();
        layer.layer(())
    }

    #[test]
    fn test_authenticate_attaches_subject() {
        let svc = service();
        let token = svc
            .codec
            .issue("user-7", Duration::from_secs(60), Default::default())
            .unwrap();
        let req = Request::builder()
            .uri("/projects")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();

        let identity = svc.authenticate(&req).unwrap();
        assert_eq!(identity.id, "user-7");
        assert_eq!(identity.claims.sub, "user-7");
    }

    #[test]
    fn test_authenticate_rejects_missing_and_bad_tokens() {
        let svc = service();

        let missing = Request::builder().uri("/projects").body(Body::empty()).unwrap();
        assert!(matches!(
            svc.authenticate(&missing),
            Err(AppError::Unauthenticated(_))
        ));

        let bad = Request::builder()
            .uri("/projects")
            .header("authorization", "Bearer not.a.token")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            svc.authenticate(&bad),
            Err(AppError::Unauthenticated(_))
        ));
    }
}
