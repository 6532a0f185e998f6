//! Envelope encryption.
//!
//! [`seal`] asks the custodian for a fresh AES-256 data key, encrypts the
//! payload locally with AES-256-GCM, and keeps only the wrapped key. [`open`]
//! unwraps the key through [`KeyCustodian::decrypt`] and decrypts. The
//! plaintext data key never outlives the call.
//!
//! The key reference is bound as associated data, so an envelope cannot be
//! relabelled to claim another master key.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    aead,
    custodian::KeyCustodian,
    encoding::base64_bytes,
    error::{CustodianError, Result},
    types::{DataKeySpec, KeyRef},
};

/// An encrypted payload with its wrapped data key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Master key the data key was generated under.
    pub key_ref: KeyRef,
    /// Data key wrapped by the custodian.
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
    /// 96-bit GCM nonce.
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// Ciphertext with the GCM tag appended.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Encrypts `plaintext` under a fresh data key generated for `key_ref`.
///
/// # Errors
///
/// Propagates custodian errors unchanged. Returns
/// [`CustodianError::MalformedResponse`] if the custodian hands back a data
/// key that is not 32 bytes.
#[tracing::instrument(
    skip(custodian, plaintext),
    fields(key_ref = %key_ref, len = plaintext.len())
)]
pub async fn seal(
    custodian: &dyn KeyCustodian,
    key_ref: &KeyRef,
    plaintext: &[u8],
) -> Result<Envelope> {
    let data_key = custodian.generate_data_key(key_ref, DataKeySpec::Aes256).await?;
    if data_key.plaintext().len() != aead::KEY_LEN {
        return Err(CustodianError::malformed_response(format!(
            "sealing requires an AES_256 data key, got {} bytes",
            data_key.plaintext().len()
        )));
    }

    let (nonce, ciphertext) =
        aead::seal(data_key.plaintext(), key_ref.as_str().as_bytes(), plaintext)?;

    Ok(Envelope {
        key_ref: key_ref.clone(),
        wrapped_key: data_key.into_ciphertext(),
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Decrypts an envelope produced by [`seal`].
///
/// # Errors
///
/// Propagates custodian errors unchanged. Returns
/// [`CustodianError::InvalidCiphertext`] if the payload, nonce or key
/// reference was tampered with.
#[tracing::instrument(skip_all, fields(key_ref = %envelope.key_ref))]
pub async fn open(custodian: &dyn KeyCustodian, envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>> {
    let data_key = custodian.decrypt(&envelope.wrapped_key).await?;
    if data_key.len() != aead::KEY_LEN {
        return Err(CustodianError::invalid_ciphertext(format!(
            "envelope data key must be {} bytes, got {}",
            aead::KEY_LEN,
            data_key.len()
        )));
    }

    aead::open(
        &data_key,
        &envelope.nonce,
        envelope.key_ref.as_str().as_bytes(),
        &envelope.ciphertext,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::testutil::{TEST_WRAPPING_KEY_REF, test_custodian};

    fn key_ref() -> KeyRef {
        KeyRef::from(TEST_WRAPPING_KEY_REF)
    }

    #[tokio::test]
    async fn test_seal_then_open() {
        let custodian = test_custodian();

        let envelope = seal(&custodian, &key_ref(), b"patient history").await.unwrap();
        assert_eq!(envelope.nonce.len(), 12);
        assert_ne!(envelope.ciphertext, b"patient history");

        let plaintext = open(&custodian, &envelope).await.unwrap();
        assert_eq!(plaintext.as_slice(), b"patient history");
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let custodian = test_custodian();
        let envelope = seal(&custodian, &key_ref(), b"").await.unwrap();
        assert!(open(&custodian, &envelope).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_each_seal_uses_a_fresh_data_key() {
        let custodian = test_custodian();
        let first = seal(&custodian, &key_ref(), b"same").await.unwrap();
        let second = seal(&custodian, &key_ref(), b"same").await.unwrap();

        assert_ne!(first.wrapped_key, second.wrapped_key);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_rejected() {
        let custodian = test_custodian();
        let mut envelope = seal(&custodian, &key_ref(), b"payload").await.unwrap();
        envelope.ciphertext[0] ^= 0x80;

        let result = open(&custodian, &envelope).await;
        assert!(matches!(result, Err(CustodianError::InvalidCiphertext { .. })));
    }

    #[tokio::test]
    async fn test_relabelled_envelope_rejected() {
        let custodian = test_custodian();
        let mut envelope = seal(&custodian, &key_ref(), b"payload").await.unwrap();
        envelope.key_ref = KeyRef::from("alias/other");

        let result = open(&custodian, &envelope).await;
        assert!(matches!(result, Err(CustodianError::InvalidCiphertext { .. })));
    }

    #[tokio::test]
    async fn test_truncated_nonce_rejected() {
        let custodian = test_custodian();
        let mut envelope = seal(&custodian, &key_ref(), b"payload").await.unwrap();
        envelope.nonce.truncate(8);

        let result = open(&custodian, &envelope).await;
        assert!(matches!(result, Err(CustodianError::InvalidCiphertext { .. })));
    }

    #[tokio::test]
    async fn test_unknown_master_key_passes_through() {
        let custodian = test_custodian();
        let result = seal(&custodian, &KeyRef::from("alias/missing"), b"payload").await;
        assert!(matches!(result, Err(CustodianError::KeyNotFound { .. })));
    }

    #[tokio::test]
    async fn test_envelope_serializes_binary_fields_as_base64() {
        let custodian = test_custodian();
        let envelope = seal(&custodian, &key_ref(), b"payload").await.unwrap();

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["key_ref"], TEST_WRAPPING_KEY_REF);
        assert!(json["nonce"].as_str().unwrap().len() == 16);

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }
}
