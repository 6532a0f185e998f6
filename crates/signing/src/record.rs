//! Signature records and their persisted form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trussrod_custodian::{Digest, KeyRef, SigningAlgorithm, encoding::base64_bytes};

use crate::canonical::CanonicalVersion;

/// Everything needed to re-verify a signed document later.
///
/// The canonicalization version is stored explicitly so verification never
/// has to infer it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    /// Custodian key that produced the signature.
    pub key_ref: KeyRef,
    /// SHA-256 of the canonical bytes.
    pub digest: Digest,
    /// Signature over [`digest`](Self::digest).
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,
    /// Canonicalization scheme the digest was computed under.
    pub canonical_version: CanonicalVersion,
    /// When the signature was produced (UTC, whole seconds).
    pub signed_at: DateTime<Utc>,
}

/// Canonical bytes stored next to their signature record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDocument {
    /// Canonical form at signing time.
    #[serde(with = "base64_bytes")]
    pub canonical: Vec<u8>,
    /// The signature over [`canonical`](Self::canonical).
    pub record: SignatureRecord,
}

impl SignedDocument {
    /// Returns `true` if the stored canonical bytes still hash to the recorded digest.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        Digest::sha256(&self.canonical) == self.record.digest
    }
}
