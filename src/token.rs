//! Signed identity tokens (JWT, HMAC family).
//!
//! The gateway only *verifies* tokens. [`TokenCodec::issue`] exists for the
//! login path and for tests; it shares the key material so both sides agree
//! on algorithm and secret.
//!
//! Verification checks, in order, structure, signature, algorithm, and the
//! `exp`/`sub` claims. [`TokenError`] keeps the precise cause for server logs
//! and metrics; callers must not surface it to clients.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{AppError, AppResult};

/// Decoded payload of a verified token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject (user id).
    pub sub: String,
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default)]
    pub iat: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Any other claims carried by the token.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why a token was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature does not verify")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is missing required claim `{0}`")]
    MissingClaim(String),

    #[error("token was rejected: {0}")]
    Rejected(String),
}

impl TokenError {
    /// Short, stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::Expired => "expired",
            TokenError::MissingClaim(_) => "missing_claim",
            TokenError::Rejected(_) => "rejected",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenError::Malformed,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                TokenError::InvalidSignature
            }
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::MissingRequiredClaim(claim) => TokenError::MissingClaim(claim.clone()),
            other => TokenError::Rejected(format!("{other:?}")),
        }
    }
}

/// Encodes and verifies identity tokens with a single shared secret.
///
/// Key material is read-only after construction; the codec is shared across
/// requests behind an `Arc` without locking.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("leeway_secs", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec for an HMAC algorithm.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` for an empty secret or a non-HMAC algorithm.
    pub fn new(secret: &str, algorithm: Algorithm, leeway: Duration) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::ConfigError(
                "token secret must not be empty".to_string(),
            ));
        }
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AppError::ConfigError(format!(
                "unsupported token algorithm {algorithm:?}"
            )));
        }

        let mut validation = Validation::new(algorithm);
        validation.leeway = leeway.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Verify a compact token and return its claims.
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        let data = jsonwebtoken::decode::<IdentityClaims>(
            token,
            &self.decoding_key,
            &self.validation,
        )?;
        if data.claims.sub.is_empty() {
            return Err(TokenError::MissingClaim("sub".to_string()));
        }
        Ok(data.claims)
    }

    /// Sign arbitrary claims.
    pub fn encode(&self, claims: &IdentityClaims) -> AppResult<String> {
        jsonwebtoken::encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
    }

    /// Issue a token for `subject` valid for `ttl` from now.
    pub fn issue(
        &self,
        subject: &str,
        ttl: Duration,
        extra: Map<String, Value>,
    ) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| AppError::Internal("token lifetime out of range".to_string()))?;
        self.encode(&IdentityClaims {
            sub: subject.to_string(),
            iat: now,
            exp: now.saturating_add(ttl),
            extra,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new("unit-test-secret", Algorithm::HS256, Duration::ZERO).unwrap()
    }

    fn claims(sub: &str, exp_offset: i64) -> IdentityClaims {
        let now = Utc::now().timestamp();
        IdentityClaims {
            sub: sub.to_string(),
            iat: now,
            exp: now + exp_offset,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_issue_then_verify() {
        let codec = codec();
        let mut extra = Map::new();
        extra.insert("email".to_string(), Value::from("ada@example.com"));

        let token = codec
            .issue("user-42", Duration::from_secs(600), extra)
            .unwrap();
        let decoded = codec.verify(&token).unwrap();

        assert_eq!(decoded.sub, "user-42");
        assert_eq!(decoded.extra["email"], "ada@example.com");
        assert!(decoded.exp > decoded.iat);
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = codec();
        let token = codec.encode(&claims("user-1", -120)).unwrap();

        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_leeway_tolerates_recent_expiry() {
        let codec =
            TokenCodec::new("unit-test-secret", Algorithm::HS256, Duration::from_secs(300))
                .unwrap();
        let token = codec.encode(&claims("user-1", -120)).unwrap();

        assert!(codec.verify(&token).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer =
            TokenCodec::new("some-other-secret", Algorithm::HS256, Duration::ZERO).unwrap();
        let token = signer.encode(&claims("user-1", 600)).unwrap();

        assert_eq!(codec().verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let signer =
            TokenCodec::new("unit-test-secret", Algorithm::HS512, Duration::ZERO).unwrap();
        let token = signer.encode(&claims("user-1", 600)).unwrap();

        let err = codec().verify(&token).unwrap_err();
        assert_eq!(err.reason(), "invalid_signature");
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(codec().verify("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(codec().verify(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let codec = codec();
        let token = codec.encode(&claims("", 600)).unwrap();

        assert_eq!(
            codec.verify(&token),
            Err(TokenError::MissingClaim("sub".to_string()))
        );
    }

    #[test]
    fn test_empty_secret_is_config_error() {
        let result = TokenCodec::new("", Algorithm::HS256, Duration::ZERO);
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_asymmetric_algorithm_is_config_error() {
        let result = TokenCodec::new("secret", Algorithm::RS256, Duration::ZERO);
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
