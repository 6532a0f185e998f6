//! Authentication error types.
//!
//! This module defines errors that can occur while fetching the remote key
//! set and validating bearer tokens against it.
//!
//! Errors fall into four groups:
//!
//! - **Transient**: the key-set endpoint was unreachable or answered with a non-success status
//!   ([`AuthError::KeySetFetch`]). Callers may retry; nothing here retries internally.
//! - **Malformed input**: unparsable tokens or key-set documents.
//! - **Security violations**: disallowed algorithms, bad signatures, issuer/audience/use mismatch.
//! - **Lookup**: a `kid` that is still unknown after a refresh ([`AuthError::KeyNotFound`]).

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Authentication errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. New variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Malformed token that cannot be decoded.
    #[error("Invalid token format: {message}")]
    InvalidTokenFormat {
        /// What was wrong with the token.
        message: String,
    },

    /// Token header has no `kid`, or the `kid` is not acceptable.
    #[error("Invalid key id: {message}")]
    InvalidKeyId {
        /// What was wrong with the key id.
        message: String,
    },

    /// Algorithm is forbidden or not in the configured allow-list.
    #[error("Unsupported algorithm: {message}")]
    UnsupportedAlgorithm {
        /// Description of the rejected algorithm.
        message: String,
    },

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer does not match the configured issuer.
    #[error("Invalid issuer: {message}")]
    InvalidIssuer {
        /// Description of the mismatch.
        message: String,
    },

    /// Audience/client identifier does not match the configured audience.
    #[error("Invalid audience: {message}")]
    InvalidAudience {
        /// Description of the mismatch.
        message: String,
    },

    /// Token has expired, even after applying leeway.
    #[error("Token expired")]
    TokenExpired,

    /// Token not yet valid (`nbf` in the future beyond leeway).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// `token_use` does not match the validation entry point.
    #[error("Token use mismatch: expected '{expected}', got '{actual}'")]
    TokenUseMismatch {
        /// The use required by the entry point.
        expected: String,
        /// The use carried by the token.
        actual: String,
    },

    /// Required claim is missing or has the wrong shape.
    #[error("Missing claim: {claim}")]
    MissingClaim {
        /// Name of the claim.
        claim: String,
    },

    /// No key with this id exists in the key set, even after a refresh.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key id that was not found.
        kid: String,
    },

    /// The key-set endpoint could not be reached or returned a non-success status.
    ///
    /// This is the only transient variant.
    #[error("Key set fetch failed: {message}")]
    KeySetFetch {
        /// Description of the failure.
        message: String,
        /// The underlying transport error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The key-set document could not be parsed.
    #[error("Malformed key set: {message}")]
    MalformedKeySet {
        /// Description of the parse failure.
        message: String,
    },

    /// A key was published but cannot be used for verification.
    #[error("Invalid public key: {message}")]
    InvalidPublicKey {
        /// Description of the problem.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid validator configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the invalid setting.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat { message: message.into() }
    }

    /// Creates a new `InvalidKeyId` error.
    #[must_use]
    pub fn invalid_key_id(message: impl Into<String>) -> Self {
        Self::InvalidKeyId { message: message.into() }
    }

    /// Creates a new `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { message: message.into() }
    }

    /// Creates a new `InvalidSignature` error.
    #[must_use]
    pub fn invalid_signature() -> Self {
        Self::InvalidSignature
    }

    /// Creates a new `InvalidIssuer` error.
    #[must_use]
    pub fn invalid_issuer(message: impl Into<String>) -> Self {
        Self::InvalidIssuer { message: message.into() }
    }

    /// Creates a new `InvalidAudience` error.
    #[must_use]
    pub fn invalid_audience(message: impl Into<String>) -> Self {
        Self::InvalidAudience { message: message.into() }
    }

    /// Creates a new `TokenExpired` error.
    #[must_use]
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates a new `TokenNotYetValid` error.
    #[must_use]
    pub fn token_not_yet_valid() -> Self {
        Self::TokenNotYetValid
    }

    /// Creates a new `TokenUseMismatch` error.
    #[must_use]
    pub fn token_use_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TokenUseMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// Creates a new `MissingClaim` error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim { claim: claim.into() }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `KeySetFetch` error with no source.
    #[must_use]
    pub fn key_set_fetch(message: impl Into<String>) -> Self {
        Self::KeySetFetch { message: message.into(), source: None }
    }

    /// Creates a new `KeySetFetch` error with a message and source error.
    #[must_use]
    pub fn key_set_fetch_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::KeySetFetch { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `MalformedKeySet` error.
    #[must_use]
    pub fn malformed_key_set(message: impl Into<String>) -> Self {
        Self::MalformedKeySet { message: message.into() }
    }

    /// Creates a new `InvalidPublicKey` error.
    #[must_use]
    pub fn invalid_public_key(message: impl Into<String>) -> Self {
        Self::InvalidPublicKey { message: message.into() }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Returns `true` if retrying the same request later could succeed.
    ///
    /// Only key-set transport failures are transient. Everything else is a
    /// property of the token or the configuration and will fail again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::KeySetFetch { .. })
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::invalid_token_format("Invalid JWT structure"),
            ErrorKind::InvalidSignature => AuthError::invalid_signature(),
            ErrorKind::ExpiredSignature => AuthError::token_expired(),
            ErrorKind::ImmatureSignature => AuthError::token_not_yet_valid(),
            ErrorKind::InvalidAudience => AuthError::invalid_audience("Audience validation failed"),
            ErrorKind::InvalidIssuer => AuthError::invalid_issuer("Issuer validation failed"),
            ErrorKind::InvalidAlgorithm => {
                AuthError::unsupported_algorithm("Algorithm does not match key")
            },
            ErrorKind::InvalidRsaKey(msg) => AuthError::invalid_public_key(msg.clone()),
            _ => AuthError::invalid_token_format(format!("JWT error: {}", err)),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_token_format("test");
        assert_eq!(err.to_string(), "Invalid token format: test");

        let err = AuthError::token_expired();
        assert_eq!(err.to_string(), "Token expired");

        let err = AuthError::missing_claim("token_use");
        assert_eq!(err.to_string(), "Missing claim: token_use");

        let err = AuthError::token_use_mismatch("access", "id");
        assert_eq!(err.to_string(), "Token use mismatch: expected 'access', got 'id'");

        let err = AuthError::key_not_found("k1");
        assert_eq!(err.to_string(), "Signing key not found: k1");
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::TokenExpired));

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidSignature);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::InvalidSignature));

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidAlgorithm);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::UnsupportedAlgorithm { .. }));
    }

    #[test]
    fn test_only_fetch_errors_are_transient() {
        assert!(AuthError::key_set_fetch("status 503").is_transient());
        assert!(!AuthError::key_not_found("k1").is_transient());
        assert!(!AuthError::malformed_key_set("no keys").is_transient());
        assert!(!AuthError::invalid_signature().is_transient());
        assert!(!AuthError::Cancelled.is_transient());
    }

    #[test]
    fn test_key_set_fetch_preserves_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = AuthError::key_set_fetch_with_source("request failed", io);

        let source = err.source().expect("source chain must be preserved");
        assert_eq!(source.to_string(), "connection refused");
        assert_eq!(err.to_string(), "Key set fetch failed: request failed");
    }

    #[test]
    fn test_key_set_fetch_without_source() {
        let err = AuthError::key_set_fetch("status 500");
        assert!(err.source().is_none());
    }
}
