//! AES-256-GCM primitives shared by key wrapping and envelope encryption.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use zeroize::Zeroizing;

use crate::error::{CustodianError, Result};

/// AES-256 key length in bytes.
pub(crate) const KEY_LEN: usize = 32;

/// GCM nonce length in bytes (96 bits).
pub(crate) const NONCE_LEN: usize = 12;

/// Encrypts `plaintext` under a fresh random nonce.
pub(crate) fn seal(key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = cipher(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CustodianError::crypto("AES-GCM encryption failed"))?;
    Ok((nonce, ciphertext))
}

/// Decrypts and authenticates `ciphertext`.
pub(crate) fn open(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_LEN {
        return Err(CustodianError::invalid_ciphertext(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LEN,
            nonce.len()
        )));
    }
    let cipher = cipher(key)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| CustodianError::invalid_ciphertext("authentication tag mismatch"))
}

/// Returns `len` random bytes for use as a key.
pub(crate) fn random_key(len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_LEN {
        return Err(CustodianError::crypto(format!(
            "AES-256 key must be {} bytes, got {}",
            KEY_LEN,
            key.len()
        )));
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
}
