//! Signing configuration.
//!
//! ```toml
//! key_ref = "alias/notes-signing"
//! algorithm = "RSASSA_PSS_SHA_256"
//! canonical_version = "v1"
//! ```

use serde::{Deserialize, Serialize};
use trussrod_custodian::{KeyRef, SigningAlgorithm};

use crate::{
    canonical::CanonicalVersion,
    error::{Result, SigningError},
};

/// Default signing algorithm.
pub const DEFAULT_SIGNING_ALGORITHM: SigningAlgorithm = SigningAlgorithm::RsassaPssSha256;

/// Configuration for a [`SigningOrchestrator`](crate::SigningOrchestrator).
///
/// # Examples
///
/// ```
/// use trussrod_signing::{CanonicalVersion, SigningConfig};
///
/// let config = SigningConfig::builder().key_ref("alias/notes-signing").build()?;
/// assert_eq!(config.key_ref().as_str(), "alias/notes-signing");
/// assert_eq!(config.canonical_version(), CanonicalVersion::V1);
/// # Ok::<(), trussrod_signing::SigningError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningConfig {
    /// Custodian key used for signing.
    pub(crate) key_ref: KeyRef,

    /// Signing algorithm.
    #[serde(default = "default_algorithm")]
    pub(crate) algorithm: SigningAlgorithm,

    /// Canonicalization version for new signatures.
    #[serde(default)]
    pub(crate) canonical_version: CanonicalVersion,
}

fn default_algorithm() -> SigningAlgorithm {
    DEFAULT_SIGNING_ALGORITHM
}

#[bon::bon]
impl SigningConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `algorithm` - Signing algorithm (default: `RSASSA_PSS_SHA_256`).
    /// * `canonical_version` - Canonicalization version (default: `v1`).
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Config`] if `key_ref` is empty.
    #[builder]
    pub fn new(
        #[builder(into)] key_ref: KeyRef,
        #[builder(default = DEFAULT_SIGNING_ALGORITHM)] algorithm: SigningAlgorithm,
        #[builder(default)] canonical_version: CanonicalVersion,
    ) -> Result<Self> {
        let config = Self { key_ref, algorithm, canonical_version };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks invariants, for configurations obtained through serde.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<()> {
        if self.key_ref.as_str().trim().is_empty() {
            return Err(SigningError::config("key_ref cannot be empty"));
        }
        Ok(())
    }

    /// Returns the signing key reference.
    #[must_use]
    pub fn key_ref(&self) -> &KeyRef {
        &self.key_ref
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Returns the canonicalization version used for new signatures.
    #[must_use]
    pub fn canonical_version(&self) -> CanonicalVersion {
        self.canonical_version
    }
}
