//! One structured log record per request.
//!
//! The record is written by a drop guard armed in `call`, so it appears
//! exactly once whether the downstream call completes, fails, or is abandoned
//! because the client disconnected, even before the first poll. Abandoned
//! requests carry `outcome = "cancelled"` and no status.
//!
//! Each request runs inside a `request` span carrying `method`, `path`,
//! `request_id` and an initially empty `user_id` that the auth layer fills in.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Method, Request, Response, StatusCode};
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{Instrument, error, info, info_span, warn};

use super::request_id::RequestIdExt;
use crate::metrics;
use crate::utils::guard;

/// Route label used when no route matched (404s, preflights).
const UNMATCHED_ROUTE: &str = "unmatched";

#[derive(Clone, Default)]
pub struct RequestLogLayer;

impl RequestLogLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService { inner }
    }
}

#[derive(Clone)]
pub struct RequestLogService<S> {
    inner: S,
}

/// What the guard knows when it fires.
struct RequestRecord {
    method: Method,
    path: String,
    route: String,
    request_id: String,
    started: Instant,
    status: Option<StatusCode>,
}

impl RequestRecord {
    fn emit(self) {
        let elapsed = self.started.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;

        let Some(status) = self.status else {
            warn!(
                method = %self.method,
                path = %self.path,
                request_id = %self.request_id,
                latency_ms,
                outcome = "cancelled",
                "Request cancelled before completion"
            );
            metrics::record_request_duration(
                &self.route,
                self.method.as_str(),
                "cancelled",
                elapsed.as_secs_f64(),
            );
            return;
        };

        if status.is_server_error() {
            error!(
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                request_id = %self.request_id,
                latency_ms,
                outcome = "completed",
                "Request finished"
            );
        } else {
            info!(
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                request_id = %self.request_id,
                latency_ms,
                outcome = "completed",
                "Request finished"
            );
        }

        metrics::record_request_duration(
            &self.route,
            self.method.as_str(),
            status.as_str(),
            elapsed.as_secs_f64(),
        );
    }
}

impl<S> Service<Request<Body>> for RequestLogService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let record = RequestRecord {
            method: req.method().clone(),
            path: normalize_path(req.uri().path()),
            route: req
                .extensions()
                .get::<MatchedPath>()
                .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
                .to_string(),
            request_id: req.request_id().unwrap_or_default(),
            started: Instant::now(),
            status: None,
        };

        let span = info_span!(
            "request",
            method = %record.method,
            path = %record.path,
            request_id = %record.request_id,
            user_id = tracing::field::Empty,
        );

        // Armed before the future exists, so dropping it unpolled still logs
        let record = guard(record, RequestRecord::emit);
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let mut record = record;
                let response = inner.call(req).await?;
                record.status = Some(response.status());
                Ok(response)
            }
            .instrument(span),
        )
    }
}

/// Collapse repeated slashes and drop a trailing slash (except for `/`).
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len().max(1));
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}
