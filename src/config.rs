//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `JWT_SECRET`: Required. HMAC secret used to verify bearer tokens
//! - `JWT_ALGORITHM`: `HS256` (default), `HS384` or `HS512`
//! - `JWT_LEEWAY_SECS`: Tolerance applied to the `exp` claim (default: 0)
//! - `AUTH_EXEMPT_PATHS`: Comma-separated path prefixes that skip authentication
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_SECS`: Sliding window length (default: 60)
//! - `RATE_LIMIT_MAX_REQUESTS`: Requests admitted per window per client (default: 100, 0 = off)
//! - `RATE_LIMIT_MAX_KEYS`: Upper bound on tracked clients (default: 100000)
//! - `RATE_LIMIT_KEY_SOURCE`: `peer` (socket address) or `forwarded` (proxy headers)
//!
//! Wildcard CORS origins combined with credentials is rejected here, at load
//! time, so the process never starts with an illegal CORS policy.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;

use crate::error::{AppError, AppResult};
use crate::middleware::TrustedProxyConfig;

/// Where the rate limiter takes its client key from.
///
/// Trusting forwarded headers is a deployment decision: only correct behind a
/// reverse proxy that overwrites them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitKeySource {
    /// The TCP peer address of the connection.
    #[default]
    Peer,
    /// First `X-Forwarded-For` value, then `X-Real-IP`, then the peer address.
    Forwarded,
}

impl FromStr for RateLimitKeySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "peer" => Ok(Self::Peer),
            "forwarded" => Ok(Self::Forwarded),
            other => Err(format!("expected `peer` or `forwarded`, got `{other}`")),
        }
    }
}

impl fmt::Display for RateLimitKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer => f.write_str("peer"),
            Self::Forwarded => f.write_str("forwarded"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected `pretty` or `json`, got `{other}`")),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Deployment environment name, reported by `/health` (default: "development")
    pub app_env: String,

    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins. `*` is only legal without credentials.
    pub cors_allowed_origins: Vec<String>,

    /// Allowed CORS methods. `*` mirrors the preflight's requested method.
    pub cors_allowed_methods: Vec<String>,

    /// Allowed CORS request headers. `*` mirrors the preflight's requested headers.
    pub cors_allowed_headers: Vec<String>,

    /// Whether `Access-Control-Allow-Credentials: true` is sent (default: true)
    pub cors_allow_credentials: bool,

    // =========================================================================
    // Token Verification
    // =========================================================================
    /// HMAC secret for bearer tokens. Required; empty is a configuration error.
    pub jwt_secret: String,

    /// Signing algorithm expected on incoming tokens (default: HS256)
    pub jwt_algorithm: Algorithm,

    /// Tolerance applied to `exp` when verifying (default: 0)
    pub jwt_leeway: Duration,

    /// Path prefixes that bypass authentication.
    /// Default: ["/auth", "/health", "/ready", "/docs", "/redoc", "/openapi.json"]
    pub auth_exempt_paths: Vec<String>,

    /// Failed token verifications tolerated per client per minute before the
    /// client is throttled (default: 10, 0 = disabled)
    pub auth_failure_limit_per_minute: u32,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Length of the sliding window (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Requests admitted per client within one window (default: 100).
    /// Set to 0 to disable rate limiting.
    pub rate_limit_max_requests: u32,

    /// Maximum number of client keys tracked at once (default: 100000)
    pub rate_limit_max_keys: usize,

    /// Where the client key is derived from (default: peer address)
    pub rate_limit_key_source: RateLimitKeySource,

    /// Trusted proxy CIDR ranges. With `forwarded` key source, forwarded
    /// headers are only honoured when the peer falls inside one of them.
    /// Empty means every peer is trusted.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format (default: pretty)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any configuration is invalid or
    /// `JWT_SECRET` is missing.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            app_env: env::var("APP_ENV").unwrap_or(defaults.app_env),
            max_request_body_size: Self::parse_env(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,

            // CORS
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS")
                .unwrap_or(defaults.cors_allowed_origins),
            cors_allowed_methods: Self::parse_list("CORS_ALLOWED_METHODS")
                .unwrap_or(defaults.cors_allowed_methods),
            cors_allowed_headers: Self::parse_list("CORS_ALLOWED_HEADERS")
                .unwrap_or(defaults.cors_allowed_headers),
            cors_allow_credentials: Self::parse_env(
                "CORS_ALLOW_CREDENTIALS",
                defaults.cors_allow_credentials,
            )?,

            // Token verification
            jwt_secret: env::var("JWT_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::ConfigError("JWT_SECRET must be set".to_string()))?,
            jwt_algorithm: Self::parse_algorithm()?,
            jwt_leeway: Duration::from_secs(Self::parse_env("JWT_LEEWAY_SECS", 0)?),
            auth_exempt_paths: Self::parse_exempt_paths().unwrap_or(defaults.auth_exempt_paths),
            auth_failure_limit_per_minute: Self::parse_env(
                "AUTH_FAILURE_LIMIT_PER_MINUTE",
                defaults.auth_failure_limit_per_minute,
            )?,

            // Rate limiting
            rate_limit_window: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )?),
            rate_limit_max_requests: Self::parse_env(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            )?,
            rate_limit_max_keys: Self::parse_env(
                "RATE_LIMIT_MAX_KEYS",
                defaults.rate_limit_max_keys,
            )?,
            rate_limit_key_source: Self::parse_env(
                "RATE_LIMIT_KEY_SOURCE",
                defaults.rate_limit_key_source,
            )?,
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES").unwrap_or_default(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: Self::parse_env("LOG_FORMAT", defaults.log_format)?,
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.jwt_secret.is_empty() {
            return Err(AppError::ConfigError("JWT_SECRET must be set".to_string()));
        }

        if !matches!(
            self.jwt_algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AppError::ConfigError(format!(
                "JWT_ALGORITHM {:?} is not supported; use HS256, HS384 or HS512",
                self.jwt_algorithm
            )));
        }

        // Wildcard + credentials is not a legal CORS combination
        if self.cors_allow_credentials && self.cors_allowed_origins.iter().any(|o| o == "*") {
            return Err(AppError::ConfigError(
                "CORS_ALLOWED_ORIGINS cannot contain `*` when CORS_ALLOW_CREDENTIALS is true"
                    .to_string(),
            ));
        }

        if self.rate_limiting_enabled() && self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_max_keys == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_MAX_KEYS must be greater than 0".to_string(),
            ));
        }

        if let Some(bad) = self.auth_exempt_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(AppError::ConfigError(format!(
                "AUTH_EXEMPT_PATHS entry `{bad}` must start with `/`"
            )));
        }

        // Parsed here so a typo fails startup instead of trusting every peer
        TrustedProxyConfig::new(&self.trusted_proxies)?;

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max_requests > 0
    }

    /// Check if trusted proxy validation is enabled.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list. `None` when the variable is unset.
    fn parse_list(name: &str) -> Option<Vec<String>> {
        env::var(name).ok().map(|s| split_list(&s))
    }

    /// Parse exempt path prefixes, dropping entries that are not absolute paths.
    fn parse_exempt_paths() -> Option<Vec<String>> {
        Self::parse_list("AUTH_EXEMPT_PATHS")
            .map(|paths| paths.into_iter().filter(|p| p.starts_with('/')).collect())
    }

    fn parse_algorithm() -> AppResult<Algorithm> {
        match env::var("JWT_ALGORITHM") {
            Ok(val) => Algorithm::from_str(val.trim())
                .map_err(|e| AppError::ConfigError(format!("Invalid JWT_ALGORITHM: {e}"))),
            Err(_) => Ok(Algorithm::HS256),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// `jwt_secret` is left empty, so this does not pass [`Config::validate`]
/// until a secret is supplied. Production deployments should use
/// `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8000,
            app_env: "development".to_string(),
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            // CORS
            cors_allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            cors_allowed_methods: split_list("GET,POST,PUT,PATCH,DELETE,OPTIONS"),
            cors_allowed_headers: split_list("authorization,content-type,x-request-id"),
            cors_allow_credentials: true,
            // Token verification
            jwt_secret: String::new(),
            jwt_algorithm: Algorithm::HS256,
            jwt_leeway: Duration::ZERO,
            auth_exempt_paths: split_list("/auth,/health,/ready,/docs,/redoc,/openapi.json"),
            auth_failure_limit_per_minute: 10,
            // Rate limiting
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 100,
            rate_limit_max_keys: 100_000,
            rate_limit_key_source: RateLimitKeySource::Peer,
            trusted_proxies: vec![],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            jwt_secret: "test-secret".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.rate_limit_max_requests, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.rate_limit_key_source, RateLimitKeySource::Peer);
        assert!(config.auth_exempt_paths.contains(&"/health".to_string()));
        assert!(config.cors_allow_credentials);
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "localhost".to_string(),
            port: 3000,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "localhost:3000");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(valid().rate_limiting_enabled());

        let config = Config {
            rate_limit_max_requests: 0,
            ..valid()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_secret() {
        let result = Config::default().validate();
        assert!(result.unwrap_err().to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_validate_wildcard_origin_with_credentials() {
        let config = Config {
            cors_allowed_origins: vec!["*".to_string()],
            cors_allow_credentials: true,
            ..valid()
        };

        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(err.to_string().contains("CORS_ALLOWED_ORIGINS"));
    }

    #[test]
    fn test_validate_wildcard_origin_without_credentials() {
        let config = Config {
            cors_allowed_origins: vec!["*".to_string()],
            cors_allow_credentials: false,
            ..valid()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_asymmetric_algorithm() {
        let config = Config {
            jwt_algorithm: Algorithm::RS256,
            ..valid()
        };

        assert!(config.validate().unwrap_err().to_string().contains("JWT_ALGORITHM"));
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..valid()
        };
        assert!(config.validate().is_err());

        // A zero window is irrelevant when the limiter is off
        let config = Config {
            rate_limit_window: Duration::ZERO,
            rate_limit_max_requests: 0,
            ..valid()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_relative_exempt_path() {
        let config = Config {
            auth_exempt_paths: vec!["health".to_string()],
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_invalid_trusted_proxy() {
        let config = Config {
            rate_limit_key_source: RateLimitKeySource::Forwarded,
            trusted_proxies: vec!["10.0.0.0/8".to_string(), "10.0.0.0/33".to_string()],
            ..valid()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::ConfigError(msg) if msg.contains("10.0.0.0/33")));

        let config = Config {
            trusted_proxies: vec!["10.0.0.0/8".to_string(), "::1".to_string()],
            ..valid()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_key_source_parse() {
        assert_eq!(
            "peer".parse::<RateLimitKeySource>().unwrap(),
            RateLimitKeySource::Peer
        );
        assert_eq!(
            " Forwarded ".parse::<RateLimitKeySource>().unwrap(),
            RateLimitKeySource::Forwarded
        );
        assert!("header".parse::<RateLimitKeySource>().is_err());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_split_list_trims_and_skips_empty() {
        assert_eq!(
            split_list(" /auth , ,/health,"),
            vec!["/auth".to_string(), "/health".to_string()]
        );
    }
}
