//! HTTP middleware making up the request gateway.
//!
//! - **Request ID**: generation and propagation of `X-Request-Id`
//! - **Request Logging**: one structured record per request, even on disconnect
//! - **Rate Limiting**: sliding window per client key
//! - **Authentication**: bearer tokens, exempt path prefixes, brute force throttle
//! - **Client Keys**: peer address or trusted forwarded headers
//!
//! The layers are composed in a fixed order by [`crate::gateway::Gateway`].

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod request_id;
pub mod request_log;

pub use auth::{ExemptPathSet, JwtAuthLayer, RequestIdentity, parse_bearer};
pub use ip::{ClientKeyResolver, TrustedProxyConfig, UNKNOWN_IP};
pub use rate_limit::{Decision, RateLimitError, RateLimitLayer, SlidingWindowStore};
pub use request_id::{REQUEST_ID_HEADER, RequestIdExt, RequestIdLayer};
pub use request_log::RequestLogLayer;
