//! Signing error types.

use thiserror::Error;
use trussrod_custodian::CustodianError;

/// Document signing errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. New variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SigningError {
    /// The document is missing a required field or is otherwise unusable.
    #[error("Malformed document: {message}")]
    MalformedInput {
        /// What was wrong with the document.
        message: String,
    },

    /// The canonicalization version is not supported.
    #[error("Unsupported canonicalization version: {version}")]
    UnsupportedVersion {
        /// The version string that was requested.
        version: String,
    },

    /// The canonical form could not be serialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Invalid signing configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The key custodian failed; passed through unchanged.
    #[error(transparent)]
    Custodian(#[from] CustodianError),
}

impl SigningError {
    /// Creates a new `MalformedInput` error.
    #[must_use]
    pub fn malformed_input(message: impl Into<String>) -> Self {
        Self::MalformedInput { message: message.into() }
    }

    /// Creates a new `UnsupportedVersion` error.
    #[must_use]
    pub fn unsupported_version(version: impl Into<String>) -> Self {
        Self::UnsupportedVersion { version: version.into() }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Returns `true` if retrying the same request later could succeed.
    ///
    /// Only custodian failures can be transient; see
    /// [`CustodianError::is_transient`].
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Custodian(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SigningError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result type alias for signing operations.
pub type Result<T> = std::result::Result<T, SigningError>;
