//! Key custodian error types.
//!
//! Custodian failures split into two groups that callers must treat
//! differently:
//!
//! - **Transient**: the custodian could not be reached or timed out
//!   ([`CustodianError::Unavailable`]), or answered with a server-side status.
//!   Nothing in this crate retries.
//! - **Definitive**: the custodian understood the request and refused it, or
//!   the input was malformed. Retrying the same call will fail again.

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Key custodian errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. New variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CustodianError {
    /// The key reference is unknown to the custodian.
    #[error("Key not found: {key_ref}")]
    KeyNotFound {
        /// The key reference that was requested.
        key_ref: String,
    },

    /// The custodian could not be reached, or the request timed out.
    #[error("Custodian unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying transport error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The custodian answered with a non-success status.
    ///
    /// `message` is the custodian's own error text, unmodified.
    #[error("Custodian returned {status}: {message}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// The digest does not fit the requested signing algorithm.
    #[error("Invalid digest: {message}")]
    InvalidDigest {
        /// What was wrong with the digest.
        message: String,
    },

    /// A wrapped key or sealed payload could not be decrypted.
    #[error("Invalid ciphertext: {message}")]
    InvalidCiphertext {
        /// Description of the failure.
        message: String,
    },

    /// The custodian's response could not be decoded.
    #[error("Malformed custodian response: {message}")]
    MalformedResponse {
        /// Description of the decode failure.
        message: String,
    },

    /// A local cryptographic operation failed.
    #[error("Crypto operation failed: {message}")]
    Crypto {
        /// Description of the failure.
        message: String,
    },

    /// Invalid provider configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl CustodianError {
    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(key_ref: impl Into<String>) -> Self {
        Self::KeyNotFound { key_ref: key_ref.into() }
    }

    /// Creates a new `Unavailable` error with no source.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates a new `Unavailable` error with a message and source error.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Remote` error.
    #[must_use]
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote { status, message: message.into() }
    }

    /// Creates a new `InvalidDigest` error.
    #[must_use]
    pub fn invalid_digest(message: impl Into<String>) -> Self {
        Self::InvalidDigest { message: message.into() }
    }

    /// Creates a new `InvalidCiphertext` error.
    #[must_use]
    pub fn invalid_ciphertext(message: impl Into<String>) -> Self {
        Self::InvalidCiphertext { message: message.into() }
    }

    /// Creates a new `MalformedResponse` error.
    #[must_use]
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::MalformedResponse { message: message.into() }
    }

    /// Creates a new `Crypto` error.
    #[must_use]
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto { message: message.into() }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Returns `true` if retrying the same request later could succeed.
    ///
    /// Transport failures are transient, as are remote answers with a 5xx or
    /// 429 status. A 4xx refusal is definitive.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result type alias for custodian operations.
pub type Result<T> = std::result::Result<T, CustodianError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error as StdError;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::unavailable(CustodianError::unavailable("connection refused"), true)]
    #[case::server_error(CustodianError::remote(503, "maintenance"), true)]
    #[case::throttled(CustodianError::remote(429, "slow down"), true)]
    #[case::access_denied(CustodianError::remote(403, "AccessDenied"), false)]
    #[case::key_not_found(CustodianError::key_not_found("alias/notes"), false)]
    #[case::invalid_digest(CustodianError::invalid_digest("length 31"), false)]
    #[case::ciphertext(CustodianError::invalid_ciphertext("tag mismatch"), false)]
    #[case::config(CustodianError::config("empty endpoint"), false)]
    fn test_transient_classification(#[case] err: CustodianError, #[case] transient: bool) {
        assert_eq!(err.is_transient(), transient, "{err}");
    }

    #[test]
    fn test_remote_message_passed_through() {
        let err = CustodianError::remote(400, "ValidationException: bad key spec");
        assert_eq!(err.to_string(), "Custodian returned 400: ValidationException: bad key spec");
    }

    #[test]
    fn test_unavailable_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline elapsed");
        let err = CustodianError::unavailable_with_source("request timed out", io);

        let source = err.source().expect("source should be preserved");
        assert_eq!(source.to_string(), "deadline elapsed");
    }
}
