//! The key custodian capability.

use std::sync::Arc;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::{
    error::Result,
    types::{DataKey, DataKeySpec, Digest, KeyRef, SigningAlgorithm},
};

/// Operations performed by a service that exclusively holds master keys.
///
/// Master key material never leaves the custodian. Callers receive wrapped
/// data keys, plaintext data keys exactly once per generation, and signatures
/// over digests they computed themselves.
///
/// Implementations are selected at construction time (for example
/// [`HttpKeyCustodian`](crate::HttpKeyCustodian) in production and
/// [`MemoryKeyCustodian`](crate::MemoryKeyCustodian) in tests) and shared as
/// `Arc<dyn KeyCustodian>`.
#[async_trait]
pub trait KeyCustodian: Send + Sync {
    /// Unwraps a blob previously produced by [`generate_data_key`](Self::generate_data_key).
    ///
    /// The blob identifies its own master key.
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Generates a data key under `key_ref`, returning it in plaintext and wrapped form.
    async fn generate_data_key(&self, key_ref: &KeyRef, spec: DataKeySpec) -> Result<DataKey>;

    /// Signs a precomputed digest with the asymmetric key `key_ref`.
    async fn sign(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>>;

    /// Verifies `signature` over a precomputed digest.
    ///
    /// Returns `Ok(false)` for a signature that does not match. Errors are
    /// reserved for failures to perform the check.
    async fn verify(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        signature: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<bool>;
}

#[async_trait]
impl<T: KeyCustodian + ?Sized> KeyCustodian for Arc<T> {
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        (**self).decrypt(ciphertext).await
    }

    async fn generate_data_key(&self, key_ref: &KeyRef, spec: DataKeySpec) -> Result<DataKey> {
        (**self).generate_data_key(key_ref, spec).await
    }

    async fn sign(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>> {
        (**self).sign(key_ref, digest, algorithm).await
    }

    async fn verify(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        signature: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<bool> {
        (**self).verify(key_ref, digest, signature, algorithm).await
    }
}
