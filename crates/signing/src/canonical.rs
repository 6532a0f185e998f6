//! Canonical form of a clinical note.
//!
//! A logical note is converted to bytes that are identical for every
//! logically identical input:
//!
//! - fields are emitted in a fixed order (struct declaration order, never map
//!   iteration)
//! - timestamps are normalized to UTC, RFC 3339, whole seconds, `Z` suffix
//! - attachments are reduced to `(key, sha256, filename)` and sorted by that
//!   tuple, so upload order does not matter
//! - the result is compact JSON
//!
//! The canonicalization version is embedded in the metadata so a stored form
//! always states how it was produced.

use std::{fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use trussrod_custodian::Digest;

use crate::error::{Result, SigningError};

/// Canonicalization scheme version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalVersion {
    /// Compact JSON, fixed field order, UTC second-precision timestamps.
    #[default]
    #[serde(rename = "v1")]
    V1,
}

impl CanonicalVersion {
    /// Version tag as embedded in canonical documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
        }
    }
}

impl fmt::Display for CanonicalVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalVersion {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1" => Ok(Self::V1),
            other => Err(SigningError::unsupported_version(other)),
        }
    }
}

/// An attachment as uploaded: storage key, display name and raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInput {
    /// Object-storage key.
    pub key: String,
    /// Display name.
    pub filename: String,
    /// Raw content; only its SHA-256 enters the canonical form.
    #[serde(with = "trussrod_custodian::encoding::base64_bytes")]
    pub content: Vec<u8>,
}

/// The logical note to be signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteInput {
    /// Note identifier (required).
    pub note_id: String,
    /// Authoring doctor (required).
    pub doctor_id: String,
    /// Patient the note is about (required).
    pub patient_id: String,
    /// Related appointment, empty when there is none.
    #[serde(default)]
    pub appointment_id: String,
    /// Document type, e.g. `"progress_note"` (required).
    pub document_type: String,
    /// Note body, included verbatim.
    pub content: String,
    /// Creation time, in any UTC offset.
    pub created_at: DateTime<FixedOffset>,
    /// Signing time, in any UTC offset.
    pub signed_at: DateTime<FixedOffset>,
    /// Signing-method tag, e.g. `"custodian"`.
    pub signed_with: String,
    /// Attachments, in any order.
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

/// Structured metadata of a [`CanonicalDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMetadata {
    /// Note identifier.
    pub note_id: String,
    /// Authoring doctor.
    pub doctor_id: String,
    /// Patient.
    pub patient_id: String,
    /// Related appointment (may be empty).
    pub appointment_id: String,
    /// Document type.
    pub document_type: String,
    /// Creation time, normalized.
    pub created_at: String,
    /// Signing time, normalized.
    pub signed_at: String,
    /// Signing-method tag.
    pub signed_with: String,
    /// Canonicalization version tag.
    pub canonical_version: CanonicalVersion,
}

/// An attachment reduced to what is signed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    /// Object-storage key.
    pub key: String,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
    /// Display name.
    pub filename: String,
}

/// The canonical, order-independent form of a [`NoteInput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Note body.
    pub content: String,
    /// Structured metadata.
    pub metadata: CanonicalMetadata,
    /// Attachments sorted by `(key, sha256, filename)`.
    pub attachments: Vec<AttachmentDescriptor>,
}

impl CanonicalDocument {
    /// Builds the canonical form of `input`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::MalformedInput`] if a required identifier
    /// (note, doctor, patient, document type) is empty.
    pub fn from_input(input: &NoteInput, version: CanonicalVersion) -> Result<Self> {
        require("note_id", &input.note_id)?;
        require("doctor_id", &input.doctor_id)?;
        require("patient_id", &input.patient_id)?;
        require("document_type", &input.document_type)?;

        let mut attachments: Vec<AttachmentDescriptor> = input
            .attachments
            .iter()
            .map(|attachment| AttachmentDescriptor {
                key: attachment.key.clone(),
                sha256: Digest::sha256(&attachment.content).to_hex(),
                filename: attachment.filename.clone(),
            })
            .collect();
        // Field order of the derived Ord is (key, sha256, filename)
        attachments.sort();

        Ok(Self {
            content: input.content.clone(),
            metadata: CanonicalMetadata {
                note_id: input.note_id.clone(),
                doctor_id: input.doctor_id.clone(),
                patient_id: input.patient_id.clone(),
                appointment_id: input.appointment_id.clone(),
                document_type: input.document_type.clone(),
                created_at: normalize_timestamp(&input.created_at),
                signed_at: normalize_timestamp(&input.signed_at),
                signed_with: input.signed_with.clone(),
                canonical_version: version,
            },
            attachments,
        })
    }

    /// Encodes the document as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Canonical bytes of `input` under `version`.
///
/// # Errors
///
/// See [`CanonicalDocument::from_input`].
pub fn canonicalize(input: &NoteInput, version: CanonicalVersion) -> Result<Vec<u8>> {
    CanonicalDocument::from_input(input, version)?.to_bytes()
}

/// UTC, RFC 3339, whole seconds, `Z` suffix. Sub-second precision is truncated.
#[must_use]
pub fn normalize_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SigningError::malformed_input(format!("{field} cannot be empty")));
    }
    Ok(())
}
