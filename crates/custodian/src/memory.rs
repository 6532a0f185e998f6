//! In-process key custodian.
//!
//! [`MemoryKeyCustodian`] keeps RSA signing keys and AES-256 wrapping keys in
//! process memory. It is meant for tests and local development: it honors the
//! same contract as a remote custodian (opaque, self-identifying wrapped
//! blobs; signatures over caller-computed digests) but offers none of its
//! isolation.
//!
//! Wrapped blob layout:
//!
//! ```text
//! [key_ref_len: u16 BE][key_ref][nonce: 12][AES-256-GCM ciphertext + tag]
//! ```
//!
//! The key reference is also bound as associated data, so a blob cannot be
//! relabelled to another wrapping key.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rsa::{
    Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey, pkcs1::DecodeRsaPrivateKey,
    pkcs8::DecodePrivateKey,
};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    aead,
    custodian::KeyCustodian,
    error::{CustodianError, Result},
    types::{DataKey, DataKeySpec, Digest, KeyRef, SigningAlgorithm},
};

/// Key custodian backed by process memory.
#[derive(Default)]
pub struct MemoryKeyCustodian {
    signing_keys: RwLock<HashMap<KeyRef, RsaPrivateKey>>,
    wrapping_keys: RwLock<HashMap<KeyRef, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyCustodian {
    /// Creates a custodian with no keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an RSA signing key.
    pub fn insert_signing_key(&self, key_ref: impl Into<KeyRef>, key: RsaPrivateKey) {
        let key_ref = key_ref.into();
        tracing::debug!(key_ref = %key_ref, "registered signing key");
        self.signing_keys.write().insert(key_ref, key);
    }

    /// Registers an RSA signing key from a PKCS#1 or PKCS#8 PEM document.
    ///
    /// # Errors
    ///
    /// Returns [`CustodianError::Config`] if the PEM cannot be parsed.
    pub fn insert_signing_key_pem(&self, key_ref: impl Into<KeyRef>, pem: &str) -> Result<()> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| CustodianError::config(format!("invalid RSA private key PEM: {e}")))?;
        self.insert_signing_key(key_ref, key);
        Ok(())
    }

    /// Generates and registers a fresh RSA signing key of `bits` bits.
    ///
    /// # Errors
    ///
    /// Returns [`CustodianError::Crypto`] if key generation fails.
    pub fn generate_signing_key(&self, key_ref: impl Into<KeyRef>, bits: usize) -> Result<()> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CustodianError::crypto(format!("RSA key generation failed: {e}")))?;
        self.insert_signing_key(key_ref, key);
        Ok(())
    }

    /// Registers a 32-byte AES-256 wrapping key.
    ///
    /// # Errors
    ///
    /// Returns [`CustodianError::Config`] if `key` is not 32 bytes long.
    pub fn insert_wrapping_key(&self, key_ref: impl Into<KeyRef>, key: &[u8]) -> Result<()> {
        if key.len() != aead::KEY_LEN {
            return Err(CustodianError::config(format!(
                "wrapping key must be {} bytes, got {}",
                aead::KEY_LEN,
                key.len()
            )));
        }
        self.wrapping_keys.write().insert(key_ref.into(), Zeroizing::new(key.to_vec()));
        Ok(())
    }

    /// Registers a freshly generated random wrapping key.
    pub fn generate_wrapping_key(&self, key_ref: impl Into<KeyRef>) {
        let key_ref = key_ref.into();
        tracing::debug!(key_ref = %key_ref, "generated wrapping key");
        self.wrapping_keys.write().insert(key_ref, aead::random_key(aead::KEY_LEN));
    }

    /// Returns the public half of a signing key.
    #[must_use]
    pub fn public_key(&self, key_ref: &KeyRef) -> Option<RsaPublicKey> {
        self.signing_keys.read().get(key_ref).map(RsaPublicKey::from)
    }

    fn wrap(&self, key_ref: &KeyRef, plaintext: &[u8]) -> Result<Vec<u8>> {
        let keys = self.wrapping_keys.read();
        let master =
            keys.get(key_ref).ok_or_else(|| CustodianError::key_not_found(key_ref.as_str()))?;

        let label = key_ref.as_str().as_bytes();
        let label_len = u16::try_from(label.len())
            .map_err(|_| CustodianError::config("key reference longer than 65535 bytes"))?;
        let (nonce, ciphertext) = aead::seal(master, label, plaintext)?;

        let mut blob = Vec::with_capacity(2 + label.len() + nonce.len() + ciphertext.len());
        blob.extend_from_slice(&label_len.to_be_bytes());
        blob.extend_from_slice(label);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn unwrap_blob(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let (key_ref, nonce, ciphertext) = split_blob(blob)?;

        let keys = self.wrapping_keys.read();
        let master =
            keys.get(&key_ref).ok_or_else(|| CustodianError::key_not_found(key_ref.as_str()))?;
        aead::open(master, nonce, key_ref.as_str().as_bytes(), ciphertext)
    }

    fn sign_digest(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>> {
        let keys = self.signing_keys.read();
        let key = keys.get(key_ref).ok_or_else(|| CustodianError::key_not_found(key_ref.as_str()))?;

        let signature = match algorithm {
            SigningAlgorithm::RsassaPssSha256 => {
                key.sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), digest.as_bytes())
            },
            SigningAlgorithm::RsassaPkcs1V15Sha256 => {
                key.sign(Pkcs1v15Sign::new::<Sha256>(), digest.as_bytes())
            },
        };
        signature.map_err(|e| CustodianError::crypto(format!("RSA signing failed: {e}")))
    }

    fn verify_digest(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        signature: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<bool> {
        let public = self
            .public_key(key_ref)
            .ok_or_else(|| CustodianError::key_not_found(key_ref.as_str()))?;

        let outcome = match algorithm {
            SigningAlgorithm::RsassaPssSha256 => {
                public.verify(Pss::new::<Sha256>(), digest.as_bytes(), signature)
            },
            SigningAlgorithm::RsassaPkcs1V15Sha256 => {
                public.verify(Pkcs1v15Sign::new::<Sha256>(), digest.as_bytes(), signature)
            },
        };
        Ok(outcome.is_ok())
    }
}

/// Splits a wrapped blob into its key reference, nonce and ciphertext.
fn split_blob(blob: &[u8]) -> Result<(KeyRef, &[u8], &[u8])> {
    let truncated = || CustodianError::invalid_ciphertext("wrapped key blob is truncated");

    let (len_bytes, rest) = blob.split_first_chunk::<2>().ok_or_else(truncated)?;
    let label_len = usize::from(u16::from_be_bytes(*len_bytes));
    if rest.len() < label_len + aead::NONCE_LEN {
        return Err(truncated());
    }

    let (label, rest) = rest.split_at(label_len);
    let (nonce, ciphertext) = rest.split_at(aead::NONCE_LEN);
    let key_ref = std::str::from_utf8(label)
        .map_err(|_| {
            CustodianError::invalid_ciphertext("wrapped key blob has a non-UTF-8 key reference")
        })?;
    Ok((KeyRef::new(key_ref), nonce, ciphertext))
}

impl fmt::Debug for MemoryKeyCustodian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut signing: Vec<String> =
            self.signing_keys.read().keys().map(ToString::to_string).collect();
        let mut wrapping: Vec<String> =
            self.wrapping_keys.read().keys().map(ToString::to_string).collect();
        signing.sort();
        wrapping.sort();
        f.debug_struct("MemoryKeyCustodian")
            .field("signing_keys", &signing)
            .field("wrapping_keys", &wrapping)
            .finish()
    }
}

#[async_trait]
impl KeyCustodian for MemoryKeyCustodian {
    #[tracing::instrument(skip_all, fields(blob_len = ciphertext.len()))]
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.unwrap_blob(ciphertext)
    }

    #[tracing::instrument(skip(self), fields(key_ref = %key_ref))]
    async fn generate_data_key(&self, key_ref: &KeyRef, spec: DataKeySpec) -> Result<DataKey> {
        let plaintext = aead::random_key(spec.key_len());
        let ciphertext = self.wrap(key_ref, &plaintext)?;
        Ok(DataKey::new(plaintext, ciphertext))
    }

    #[tracing::instrument(skip(self, digest), fields(key_ref = %key_ref))]
    async fn sign(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>> {
        self.sign_digest(key_ref, digest, algorithm)
    }

    #[tracing::instrument(skip(self, digest, signature), fields(key_ref = %key_ref))]
    async fn verify(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        signature: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<bool> {
        self.verify_digest(key_ref, digest, signature, algorithm)
    }
}
