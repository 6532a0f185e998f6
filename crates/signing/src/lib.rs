//! # Trussrod Document Signing
//!
//! Deterministic canonicalization of clinical notes and signing of their
//! digests through a [`KeyCustodian`](trussrod_custodian::KeyCustodian).
//!
//! The private signing key never leaves the custodian: this crate computes
//! the SHA-256 of the canonical bytes locally and asks the custodian to sign
//! or verify that digest. Every [`SignatureRecord`] carries the
//! canonicalization version it was computed under, so old signatures remain
//! verifiable after the canonical form evolves.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use trussrod_custodian::{HttpCustodianConfig, HttpKeyCustodian};
//! use trussrod_signing::{NoteInput, SigningConfig, SigningOrchestrator};
//!
//! # async fn example(note: NoteInput) -> Result<(), trussrod_signing::SigningError> {
//! let custodian = HttpKeyCustodian::new(
//!     &HttpCustodianConfig::builder().endpoint("https://custodian.internal").build()?,
//! )?;
//! let config = SigningConfig::builder().key_ref("alias/notes-signing").build()?;
//! let signer = SigningOrchestrator::new(Arc::new(custodian), config);
//!
//! let record = signer.sign(&note).await?;
//! assert!(signer.verify(&note, &record).await?);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Canonical form of clinical notes.
pub mod canonical;
/// Signing configuration.
pub mod config;
/// Signing error types.
pub mod error;
/// Custodian-backed signing and verification.
pub mod orchestrator;
/// Signature records.
pub mod record;

pub use canonical::{
    AttachmentDescriptor, AttachmentInput, CanonicalDocument, CanonicalMetadata, CanonicalVersion,
    NoteInput, canonicalize,
};
pub use config::{DEFAULT_SIGNING_ALGORITHM, SigningConfig};
pub use error::{Result, SigningError};
pub use orchestrator::SigningOrchestrator;
pub use record::{SignatureRecord, SignedDocument};
