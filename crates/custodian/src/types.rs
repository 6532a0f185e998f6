//! Value types shared by every custodian provider.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use sha2::{Digest as _, Sha256};
use zeroize::Zeroizing;

use crate::{
    encoding,
    error::{CustodianError, Result},
};

/// Reference to a master key held by the custodian (key id, alias or ARN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRef(String);

impl KeyRef {
    /// Creates a key reference.
    pub fn new(key_ref: impl Into<String>) -> Self {
        Self(key_ref.into())
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for KeyRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for KeyRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Asymmetric signing algorithms a custodian key can use.
///
/// Both operate on a SHA-256 digest computed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PSS with SHA-256 and a salt as long as the hash.
    #[serde(rename = "RSASSA_PSS_SHA_256")]
    RsassaPssSha256,
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    #[serde(rename = "RSASSA_PKCS1_V1_5_SHA_256")]
    RsassaPkcs1V15Sha256,
}

impl SigningAlgorithm {
    /// Wire name of the algorithm.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RsassaPssSha256 => "RSASSA_PSS_SHA_256",
            Self::RsassaPkcs1V15Sha256 => "RSASSA_PKCS1_V1_5_SHA_256",
        }
    }

    /// Length in bytes of the digest the algorithm signs.
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::RsassaPssSha256 | Self::RsassaPkcs1V15Sha256 => Digest::LEN,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RSASSA_PSS_SHA_256" => Ok(Self::RsassaPssSha256),
            "RSASSA_PKCS1_V1_5_SHA_256" => Ok(Self::RsassaPkcs1V15Sha256),
            other => {
                Err(CustodianError::config(format!("unsupported signing algorithm '{other}'")))
            },
        }
    }
}

/// Size of a generated data encryption key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKeySpec {
    /// 256-bit AES key.
    #[serde(rename = "AES_256")]
    Aes256,
    /// 128-bit AES key.
    #[serde(rename = "AES_128")]
    Aes128,
}

impl DataKeySpec {
    /// Key length in bytes.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes256 => 32,
            Self::Aes128 => 16,
        }
    }

    /// Wire name of the spec.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aes256 => "AES_256",
            Self::Aes128 => "AES_128",
        }
    }
}

/// A SHA-256 digest.
///
/// Serialized as base64; displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; Digest::LEN]);

impl Digest {
    /// Digest length in bytes.
    pub const LEN: usize = 32;

    /// Hashes `data` with SHA-256.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Wraps a precomputed digest.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Wraps a precomputed digest of unchecked length.
    ///
    /// # Errors
    ///
    /// Returns [`CustodianError::InvalidDigest`] unless `bytes` is exactly
    /// 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; Self::LEN] = bytes.try_into().map_err(|_| {
            CustodianError::invalid_digest(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Returns the digest as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        encoding::base64_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = encoding::base64_bytes::deserialize(deserializer)?;
        Self::from_slice(&bytes).map_err(D::Error::custom)
    }
}

/// A freshly generated data encryption key.
///
/// The plaintext exists only in process memory: it is zeroized on drop,
/// redacted from `Debug`, and the type is deliberately not `Serialize`. Only
/// [`ciphertext`](Self::ciphertext) may be stored.
pub struct DataKey {
    plaintext: Zeroizing<Vec<u8>>,
    ciphertext: Vec<u8>,
}

impl DataKey {
    /// Pairs a plaintext key with its wrapped form.
    #[must_use]
    pub fn new(plaintext: Zeroizing<Vec<u8>>, ciphertext: Vec<u8>) -> Self {
        Self { plaintext, ciphertext }
    }

    /// The plaintext key. Use it immediately and let it drop.
    #[must_use]
    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    /// The key wrapped under the custodian's master key.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Drops the plaintext and keeps only the wrapped key.
    #[must_use]
    pub fn into_ciphertext(self) -> Vec<u8> {
        self.ciphertext
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &"[REDACTED]")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}
