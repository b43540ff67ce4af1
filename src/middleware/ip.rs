//! Client key derivation for rate limiting and auth-failure throttling.
//!
//! # Key Sources
//!
//! - [`RateLimitKeySource::Peer`]: the TCP peer address from Axum's
//!   `ConnectInfo<SocketAddr>` extension. Cannot be spoofed, but every client
//!   behind one proxy shares a key.
//! - [`RateLimitKeySource::Forwarded`]: first `X-Forwarded-For` value, then
//!   `X-Real-IP`, then the peer address.
//!
//! # Security Warning: IP Spoofing Risk
//!
//! Forwarded headers are client-controlled unless a reverse proxy overwrites
//! them. Use `forwarded` only behind such a proxy, and configure
//! `TRUSTED_PROXIES` so that headers arriving from any other peer are ignored:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! Forwarded values must parse as an IP address (optionally with a port);
//! anything else is ignored and the peer address is used instead.
//!
//! ## The "unknown" Fallback
//!
//! When no key can be derived (no `ConnectInfo`, no usable header), all such
//! requests share the `"unknown"` key and are collectively rate-limited.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::debug;

use crate::config::RateLimitKeySource;
use crate::error::{AppError, AppResult};

/// Fallback key when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as /32 or /128. Returns `None` if the format
    /// is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok()?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Configuration for trusted proxy validation.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Create a new trusted proxy configuration from CIDR strings.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` naming the first entry that is not a valid
    /// address or CIDR range. Entries are never skipped, since an empty list
    /// trusts every peer.
    pub fn new(cidrs: &[String]) -> AppResult<Self> {
        let ranges = cidrs
            .iter()
            .map(|cidr| {
                CidrRange::parse(cidr).ok_or_else(|| {
                    AppError::ConfigError(format!(
                        "TRUSTED_PROXIES entry `{cidr}` is not a valid address or CIDR range"
                    ))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Ok(Self { ranges })
    }

    /// Check if trusted proxy validation is enabled (any ranges configured).
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Check if a peer address is a trusted proxy.
    ///
    /// Returns `true` when no ranges are configured (trust all mode).
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Key Resolution
// =============================================================================

/// Derives the rate-limit key for a request.
#[derive(Debug, Clone, Default)]
pub struct ClientKeyResolver {
    source: RateLimitKeySource,
    trusted_proxies: TrustedProxyConfig,
}

impl ClientKeyResolver {
    /// # Errors
    ///
    /// See [`TrustedProxyConfig::new`].
    pub fn new(source: RateLimitKeySource, trusted_proxies: &[String]) -> AppResult<Self> {
        Ok(Self {
            source,
            trusted_proxies: TrustedProxyConfig::new(trusted_proxies)?,
        })
    }

    pub fn source(&self) -> RateLimitKeySource {
        self.source
    }

    /// Resolve the client key.
    ///
    /// Returns `Cow<'static, str>` - borrowed for "unknown" (no allocation),
    /// owned otherwise.
    pub fn resolve<B>(&self, req: &Request<B>) -> Cow<'static, str> {
        let peer = peer_ip(req);

        if self.source == RateLimitKeySource::Forwarded {
            let peer_trusted = peer.is_none_or(|ip| self.trusted_proxies.is_trusted(&ip));

            if peer_trusted {
                if let Some(forwarded) = forwarded_ip(req) {
                    return Cow::Owned(forwarded.to_string());
                }
            } else if req.headers().contains_key("x-forwarded-for")
                || req.headers().contains_key("x-real-ip")
            {
                debug!(
                    peer = ?peer,
                    "Ignoring forwarded headers from untrusted peer"
                );
            }
        }

        match peer {
            Some(ip) => Cow::Owned(ip.to_string()),
            None => Cow::Borrowed(UNKNOWN_IP),
        }
    }
}

/// Peer address recorded by `into_make_service_with_connect_info`.
#[inline]
fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// First `X-Forwarded-For` entry, else `X-Real-IP`, if it parses as an address.
#[inline]
fn forwarded_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    // Format: "client, proxy1, proxy2" - the first entry is the client
    if let Some(value) = req.headers().get("x-forwarded-for")
        && let Ok(value) = value.to_str()
        && let Some(ip) = value.split(',').next().and_then(parse_ip)
    {
        return Some(ip);
    }

    req.headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_ip)
}

/// `1.2.3.4`, `::1`, `1.2.3.4:80` or `[::1]:80`.
fn parse_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim();
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
