//! Per-client rate limiting with a sliding window.
//!
//! # Algorithm
//!
//! Every client key owns an ordered list of admission timestamps. On each
//! request the list is pruned of timestamps at least `window` old, then:
//!
//! - fewer than `max_requests` remain: `now` is appended and the request passes
//! - otherwise: 429, and nothing is recorded
//!
//! A timestamp exactly `window` old no longer counts. Unlike a fixed bucket,
//! the allowance frees up one request at a time as old timestamps age out.
//!
//! # Concurrency
//!
//! Windows live in a [`DashMap`]. Prune, check and append for one key happen
//! while holding that key's shard lock through `entry()`, so concurrent
//! requests for the same key are serialized and `2N` racing requests against a
//! limit of `N` admit exactly `N`. Different keys contend only when they hash
//! to the same shard.
//!
//! # Memory
//!
//! Windows are pruned lazily, on access. The number of tracked keys is capped
//! by `max_keys`. Keys sit in an insertion-order queue that only new keys
//! touch; when a new key arrives at the cap, a second-chance (CLOCK) pass
//! over the queue head evicts the first key that is idle or has not been seen
//! since it was last passed over. The pass inspects at most
//! [`EVICTION_SCAN_LIMIT`] candidates before evicting unconditionally, so the
//! cost of admitting a new key does not grow with the map and requests for
//! known keys never wait on it.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the oldest counted request ages out (min 1)
//! - `X-RateLimit-Limit`: Configured requests per window
//! - `X-RateLimit-Remaining`: Always 0

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use dashmap::DashMap;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, info};

use super::ip::ClientKeyResolver;
use crate::error::AppError;
use crate::metrics;

/// Most keys a single eviction pass gives a second chance to.
pub const EVICTION_SCAN_LIMIT: usize = 8;

/// Error type for rate limit layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// `max_requests` cannot be zero; skip the layer instead.
    ZeroRequests,
    /// The window must be a positive duration.
    ZeroWindow,
    /// At least one key must be trackable.
    ZeroKeys,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroRequests => {
                write!(
                    f,
                    "max_requests must be greater than 0; omit the layer for no limiting"
                )
            }
            RateLimitError::ZeroWindow => write!(f, "window must be greater than 0"),
            RateLimitError::ZeroKeys => write!(f, "max_keys must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Recorded; `remaining` more requests fit in the current window.
    Admitted { remaining: u32 },
    /// Not recorded; the oldest counted request ages out after `retry_after`.
    Rejected { retry_after: Duration },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    /// `Retry-After` value in whole seconds, rounded up, at least 1.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Decision::Admitted { .. } => None,
            Decision::Rejected { retry_after } => Some(whole_secs(*retry_after)),
        }
    }
}

/// Round up to whole seconds, never below 1.
pub(crate) fn whole_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

#[derive(Debug, Default)]
struct Window {
    hits: VecDeque<Instant>,
    /// Seen again since the eviction pass last looked at this key.
    referenced: bool,
}

impl Window {
    /// Drop timestamps that are `window` or more behind `now`.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Process-wide sliding-window counters, partitioned by client key.
#[derive(Debug)]
pub struct SlidingWindowStore {
    windows: DashMap<String, Window>,
    /// Every tracked key, oldest insertion first. Locked only to add or
    /// evict keys, always before any shard lock.
    order: Mutex<VecDeque<String>>,
    window: Duration,
    max_requests: u32,
    max_keys: usize,
    label: &'static str,
}

impl SlidingWindowStore {
    /// # Errors
    ///
    /// Returns a [`RateLimitError`] when any bound is zero.
    pub fn new(window: Duration, max_requests: u32, max_keys: usize) -> Result<Self, RateLimitError> {
        if max_requests == 0 {
            return Err(RateLimitError::ZeroRequests);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        if max_keys == 0 {
            return Err(RateLimitError::ZeroKeys);
        }

        Ok(Self {
            windows: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            window,
            max_requests,
            max_keys,
            label: "rate_limit",
        })
    }

    /// Name reported on the tracked-clients gauge.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Number of client keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.order.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check and record a request for `key` at the current instant.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Check and record a request for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        if let Some(mut window) = self.windows.get_mut(key) {
            window.referenced = true;
            return self.admit(&mut window, now);
        }
        self.admit_new(key, now)
    }

    /// How long until `key` may be admitted again, without recording anything.
    ///
    /// `None` when the key is unknown or below its limit.
    pub fn retry_after(&self, key: &str) -> Option<Duration> {
        self.retry_after_at(key, Instant::now())
    }

    pub fn retry_after_at(&self, key: &str, now: Instant) -> Option<Duration> {
        let mut window = self.windows.get_mut(key)?;
        window.prune(now, self.window);
        if window.hits.len() < self.max_requests as usize {
            return None;
        }
        Some(self.time_to_free(&window, now))
    }

    /// Prune, check and append for one window. Runs under its shard lock.
    fn admit(&self, window: &mut Window, now: Instant) -> Decision {
        window.prune(now, self.window);

        let counted = window.hits.len();
        if counted >= self.max_requests as usize {
            return Decision::Rejected {
                retry_after: self.time_to_free(window, now),
            };
        }

        window.hits.push_back(now);
        let remaining = (self.max_requests as usize).saturating_sub(counted + 1);
        Decision::Admitted {
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        }
    }

    fn time_to_free(&self, window: &Window, now: Instant) -> Duration {
        let oldest = window.hits.front().copied().unwrap_or(now);
        self.window
            .saturating_sub(now.saturating_duration_since(oldest))
    }

    fn admit_new(&self, key: &str, now: Instant) -> Decision {
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);

        // Another request for the same key may have inserted it meanwhile
        if let Some(mut window) = self.windows.get_mut(key) {
            window.referenced = true;
            return self.admit(&mut window, now);
        }

        if order.len() >= self.max_keys {
            let inspected = self.make_room(&mut order, now);
            debug!(store = self.label, inspected, "Made room for new client key");
        }

        let mut window = Window::default();
        let decision = self.admit(&mut window, now);
        self.windows.insert(key.to_owned(), window);
        order.push_back(key.to_owned());
        metrics::set_tracked_clients(self.label, order.len());

        decision
    }

    /// Evict until there is room for one more key; returns the number of
    /// candidates inspected.
    ///
    /// Idle keys and keys not seen since their last pass are evicted; others
    /// get a second chance at the back of the queue. Once [`EVICTION_SCAN_LIMIT`]
    /// candidates have been spared, the next one is evicted regardless.
    fn make_room(&self, order: &mut VecDeque<String>, now: Instant) -> usize {
        let mut inspected = 0;

        while order.len() >= self.max_keys {
            let Some(candidate) = order.pop_front() else {
                break;
            };
            inspected += 1;

            let spare = match self.windows.get_mut(&candidate) {
                Some(mut window) => {
                    window.prune(now, self.window);
                    let spare = window.referenced
                        && !window.hits.is_empty()
                        && inspected <= EVICTION_SCAN_LIMIT;
                    window.referenced = false;
                    spare
                }
                None => false,
            };

            if spare {
                order.push_back(candidate);
            } else if self.windows.remove(&candidate).is_some() {
                debug!(
                    store = self.label,
                    evicted = %candidate,
                    max_keys = self.max_keys,
                    "Key cap reached, evicted client"
                );
            }
        }

        inspected
    }
}

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let store = SlidingWindowStore::new(Duration::from_secs(60), 100, 100_000)?;
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(Arc::new(store), Arc::new(ClientKeyResolver::default())));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    store: Arc<SlidingWindowStore>,
    resolver: Arc<ClientKeyResolver>,
}

impl RateLimitLayer {
    pub fn new(store: Arc<SlidingWindowStore>, resolver: Arc<ClientKeyResolver>) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &Arc<SlidingWindowStore> {
        &self.store
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            store: self.store.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    store: Arc<SlidingWindowStore>,
    resolver: Arc<ClientKeyResolver>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        let mut inner = self.inner.clone();

        // Decide synchronously; the counter is never rolled back even if the
        // client goes away before the response is written.
        let client_key = self.resolver.resolve(&req);
        let decision = self.store.check(&client_key);

        if decision.is_admitted() {
            return Box::pin(async move { inner.call(req).await });
        }

        let retry_after_secs = decision.retry_after_secs().unwrap_or(1);
        let limit = self.store.max_requests();
        info!(
            client_key = %client_key,
            path = %req.uri().path(),
            retry_after_secs,
            limit,
            "Request rejected by rate limiter"
        );
        metrics::record_rate_limited();

        Box::pin(async move {
            Ok(AppError::RateLimitExceeded {
                retry_after_secs,
                limit,
            }
            .into_response())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn store(max_requests: u32) -> SlidingWindowStore {
        SlidingWindowStore::new(WINDOW, max_requests, 1_000).unwrap()
    }

    #[test]
    fn test_zero_bounds_rejected() {
        assert_eq!(
            SlidingWindowStore::new(WINDOW, 0, 10).unwrap_err(),
            RateLimitError::ZeroRequests
        );
        assert_eq!(
            SlidingWindowStore::new(Duration::ZERO, 1, 10).unwrap_err(),
            RateLimitError::ZeroWindow
        );
        assert_eq!(
            SlidingWindowStore::new(WINDOW, 1, 0).unwrap_err(),
            RateLimitError::ZeroKeys
        );
    }

    #[test]
    fn test_admits_up_to_limit_then_rejects() {
        let store = store(3);
        let t0 = Instant::now();

        assert_eq!(store.check_at("a", t0), Decision::Admitted { remaining: 2 });
        assert_eq!(store.check_at("a", t0), Decision::Admitted { remaining: 1 });
        assert_eq!(store.check_at("a", t0), Decision::Admitted { remaining: 0 });

        let rejected = store.check_at("a", t0 + Duration::from_secs(10));
        assert_eq!(
            rejected,
            Decision::Rejected {
                retry_after: Duration::from_secs(50)
            }
        );
        assert_eq!(rejected.retry_after_secs(), Some(50));
    }

    #[test]
    fn test_rejection_is_not_recorded() {
        let store = store(1);
        let t0 = Instant::now();

        assert!(store.check_at("a", t0).is_admitted());
        for i in 1..10 {
            assert!(!store.check_at("a", t0 + Duration::from_secs(i)).is_admitted());
        }

        // Only the first admission counts, so the key frees up once it ages out
        assert!(store.check_at("a", t0 + WINDOW).is_admitted());
    }

    #[test]
    fn test_timestamp_exactly_window_old_is_expired() {
        let store = store(1);
        let t0 = Instant::now();

        assert!(store.check_at("a", t0).is_admitted());
        assert!(!store.check_at("a", t0 + WINDOW - Duration::from_millis(1)).is_admitted());
        assert!(store.check_at("a", t0 + WINDOW).is_admitted());
    }

    #[test]
    fn test_window_slides_one_request_at_a_time() {
        let store = store(2);
        let t0 = Instant::now();

        assert!(store.check_at("a", t0).is_admitted());
        assert!(store.check_at("a", t0 + Duration::from_secs(30)).is_admitted());
        assert!(!store.check_at("a", t0 + Duration::from_secs(45)).is_admitted());

        // First timestamp expired, second still counts
        assert!(store.check_at("a", t0 + Duration::from_secs(60)).is_admitted());
        assert!(!store.check_at("a", t0 + Duration::from_secs(61)).is_admitted());
    }

    #[test]
    fn test_keys_are_independent() {
        let store = store(1);
        let t0 = Instant::now();

        assert!(store.check_at("a", t0).is_admitted());
        assert!(!store.check_at("a", t0).is_admitted());
        assert!(store.check_at("b", t0).is_admitted());
    }

    #[test]
    fn test_retry_after_rounds_up_and_is_at_least_one() {
        let sub_second = Decision::Rejected {
            retry_after: Duration::from_millis(200),
        };
        assert_eq!(sub_second.retry_after_secs(), Some(1));

        let fractional = Decision::Rejected {
            retry_after: Duration::from_millis(2_500),
        };
        assert_eq!(fractional.retry_after_secs(), Some(3));

        assert_eq!(Decision::Admitted { remaining: 0 }.retry_after_secs(), None);
    }

    #[test]
    fn test_key_cap_sweeps_idle_windows() {
        let store = SlidingWindowStore::new(WINDOW, 5, 2).unwrap();
        let t0 = Instant::now();

        store.check_at("a", t0);
        store.check_at("b", t0 + Duration::from_secs(30));
        assert_eq!(store.tracked_keys(), 2);

        // "a" has fully expired by now, "b" has not
        store.check_at("c", t0 + Duration::from_secs(61));
        assert_eq!(store.tracked_keys(), 2);
        assert!(store.windows.contains_key("b"));
        assert!(!store.windows.contains_key("a"));
    }

    #[test]
    fn test_key_cap_spares_recently_seen() {
        let store = SlidingWindowStore::new(WINDOW, 5, 2).unwrap();
        let t0 = Instant::now();

        store.check_at("a", t0);
        store.check_at("b", t0 + Duration::from_secs(1));
        store.check_at("a", t0 + Duration::from_secs(2));

        store.check_at("c", t0 + Duration::from_secs(3));
        assert_eq!(store.tracked_keys(), 2);
        assert!(store.windows.contains_key("a"));
        assert!(!store.windows.contains_key("b"));
        assert!(store.windows.contains_key("c"));
    }

    #[test]
    fn test_eviction_work_is_bounded_when_every_key_is_live() {
        let max_keys = 1_000;
        let store = SlidingWindowStore::new(WINDOW, 5, max_keys).unwrap();
        let t0 = Instant::now();

        // Every key live and seen twice, so every key deserves a second chance
        for _ in 0..2 {
            for i in 0..max_keys {
                store.check_at(&format!("k{i}"), t0);
            }
        }

        let inspected = {
            let mut order = store.order.lock().unwrap();
            store.make_room(&mut order, t0)
        };

        assert_eq!(inspected, EVICTION_SCAN_LIMIT + 1);
        assert_eq!(store.tracked_keys(), max_keys - 1);
        for i in 0..EVICTION_SCAN_LIMIT {
            assert!(store.windows.contains_key(&format!("k{i}")));
        }
        assert!(!store.windows.contains_key(&format!("k{EVICTION_SCAN_LIMIT}")));
    }

    #[test]
    fn test_flood_of_new_keys_keeps_active_client() {
        let max_keys = 64;
        let store = SlidingWindowStore::new(WINDOW, 1_000, max_keys).unwrap();
        let t0 = Instant::now();

        assert!(store.check_at("steady", t0).is_admitted());
        for i in 0..max_keys * 10 {
            store.check_at(&format!("flood-{i}"), t0);
            if i % 16 == 0 {
                assert!(store.check_at("steady", t0).is_admitted());
            }
        }

        assert_eq!(store.tracked_keys(), max_keys);
        assert_eq!(store.windows.len(), max_keys);
        // All 41 earlier admissions still count
        assert_eq!(
            store.check_at("steady", t0),
            Decision::Admitted { remaining: 958 }
        );
    }

    #[test]
    fn test_retry_after_does_not_record() {
        let store = store(2);
        let t0 = Instant::now();

        assert_eq!(store.retry_after_at("a", t0), None);
        assert!(!store.windows.contains_key("a"));

        store.check_at("a", t0);
        assert_eq!(store.retry_after_at("a", t0), None);
        store.check_at("a", t0 + Duration::from_secs(20));

        assert_eq!(
            store.retry_after_at("a", t0 + Duration::from_secs(30)),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            store.retry_after_at("a", t0 + Duration::from_secs(30)),
            Some(Duration::from_secs(30))
        );
        assert_eq!(store.retry_after_at("a", t0 + WINDOW), None);
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_limit() {
        let store = Arc::new(store(50));
        let now = Instant::now();

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.check_at("shared", now).is_admitted())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 50);
    }
}
