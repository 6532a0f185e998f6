//! Custodian-backed document signing.
//!
//! Signing: canonicalize → SHA-256 → [`KeyCustodian::sign`] → [`SignatureRecord`].
//! Verification recomputes the canonical digest from the logical document
//! under the record's own canonicalization version. A digest that no longer
//! matches is answered locally with `false`; only a matching digest is sent
//! to the custodian for signature verification.

use std::{fmt, sync::Arc};

use chrono::{SubsecRound, Utc};
use trussrod_custodian::{Digest, KeyCustodian};

use crate::{
    canonical::{CanonicalVersion, NoteInput, canonicalize},
    config::SigningConfig,
    error::Result,
    record::{SignatureRecord, SignedDocument},
};

/// Signs and verifies documents through a key custodian.
///
/// Holds no mutable state; share it freely across tasks.
#[derive(Clone)]
pub struct SigningOrchestrator {
    custodian: Arc<dyn KeyCustodian>,
    config: SigningConfig,
}

impl fmt::Debug for SigningOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningOrchestrator").field("config", &self.config).finish_non_exhaustive()
    }
}

impl SigningOrchestrator {
    /// Creates an orchestrator signing with `config` through `custodian`.
    #[must_use]
    pub fn new(custodian: Arc<dyn KeyCustodian>, config: SigningConfig) -> Self {
        Self { custodian, config }
    }

    /// Returns the signing configuration.
    #[must_use]
    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Canonical bytes of `document` under the configured version.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::MalformedInput`](crate::SigningError::MalformedInput)
    /// for documents missing required identifiers.
    pub fn canonical_bytes(&self, document: &NoteInput) -> Result<Vec<u8>> {
        canonicalize(document, self.config.canonical_version())
    }

    /// Signs `document`.
    ///
    /// # Errors
    ///
    /// Canonicalization errors, or custodian errors passed through unchanged.
    #[tracing::instrument(
        skip_all,
        fields(note_id = %document.note_id, key_ref = %self.config.key_ref())
    )]
    pub async fn sign(&self, document: &NoteInput) -> Result<SignatureRecord> {
        let canonical = self.canonical_bytes(document)?;
        self.sign_canonical(&canonical).await
    }

    /// Signs `document` and returns the record together with the canonical
    /// bytes it covers, ready to persist.
    ///
    /// # Errors
    ///
    /// See [`sign`](Self::sign).
    #[tracing::instrument(
        skip_all,
        fields(note_id = %document.note_id, key_ref = %self.config.key_ref())
    )]
    pub async fn sign_document(&self, document: &NoteInput) -> Result<SignedDocument> {
        let canonical = self.canonical_bytes(document)?;
        let record = self.sign_canonical(&canonical).await?;
        Ok(SignedDocument { canonical, record })
    }

    /// Verifies `record` against the current state of `document`.
    ///
    /// Returns `Ok(false)` without contacting the custodian if the document
    /// no longer hashes to the recorded digest.
    ///
    /// # Errors
    ///
    /// Canonicalization errors, or custodian errors passed through unchanged.
    /// A failure to verify is never reported as `false`.
    #[tracing::instrument(skip_all, fields(note_id = %document.note_id, key_ref = %record.key_ref))]
    pub async fn verify(&self, document: &NoteInput, record: &SignatureRecord) -> Result<bool> {
        let digest = digest_for(document, record.canonical_version)?;
        if digest != record.digest {
            tracing::warn!(
                expected = %record.digest,
                actual = %digest,
                "document no longer matches signed digest"
            );
            return Ok(false);
        }

        let valid = self
            .custodian
            .verify(&record.key_ref, &digest, &record.signature, record.algorithm)
            .await?;
        if valid {
            tracing::debug!("signature verified");
        } else {
            tracing::warn!("custodian rejected signature");
        }
        Ok(valid)
    }

    async fn sign_canonical(&self, canonical: &[u8]) -> Result<SignatureRecord> {
        let digest = Digest::sha256(canonical);
        let key_ref = self.config.key_ref();
        let algorithm = self.config.algorithm();

        let signature = self.custodian.sign(key_ref, &digest, algorithm).await?;

        tracing::info!(digest = %digest, algorithm = %algorithm, "document signed");
        Ok(SignatureRecord {
            key_ref: key_ref.clone(),
            digest,
            signature,
            algorithm,
            canonical_version: self.config.canonical_version(),
            signed_at: Utc::now().trunc_subsecs(0),
        })
    }
}

fn digest_for(document: &NoteInput, version: CanonicalVersion) -> Result<Digest> {
    Ok(Digest::sha256(&canonicalize(document, version)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset, Timelike};
    use trussrod_custodian::{
        CustodianError, DataKey, DataKeySpec, KeyRef, MemoryKeyCustodian, SigningAlgorithm,
        testutil::{TEST_SIGNING_KEY_REF, test_custodian},
    };
    use zeroize::Zeroizing;

    use super::*;
    use crate::{canonical::AttachmentInput, error::SigningError};

    /// Wraps a custodian and counts the calls that reach it.
    struct CountingCustodian {
        inner: MemoryKeyCustodian,
        signs: AtomicUsize,
        verifies: AtomicUsize,
    }

    impl CountingCustodian {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: test_custodian(),
                signs: AtomicUsize::new(0),
                verifies: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl KeyCustodian for CountingCustodian {
        async fn decrypt(
            &self,
            ciphertext: &[u8],
        ) -> trussrod_custodian::Result<Zeroizing<Vec<u8>>> {
            self.inner.decrypt(ciphertext).await
        }

        async fn generate_data_key(
            &self,
            key_ref: &KeyRef,
            spec: DataKeySpec,
        ) -> trussrod_custodian::Result<DataKey> {
            self.inner.generate_data_key(key_ref, spec).await
        }

        async fn sign(
            &self,
            key_ref: &KeyRef,
            digest: &Digest,
            algorithm: SigningAlgorithm,
        ) -> trussrod_custodian::Result<Vec<u8>> {
            self.signs.fetch_add(1, Ordering::SeqCst);
            self.inner.sign(key_ref, digest, algorithm).await
        }

        async fn verify(
            &self,
            key_ref: &KeyRef,
            digest: &Digest,
            signature: &[u8],
            algorithm: SigningAlgorithm,
        ) -> trussrod_custodian::Result<bool> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(key_ref, digest, signature, algorithm).await
        }
    }

    /// A custodian that is always down.
    struct UnavailableCustodian;

    #[async_trait]
    impl KeyCustodian for UnavailableCustodian {
        async fn decrypt(&self, _: &[u8]) -> trussrod_custodian::Result<Zeroizing<Vec<u8>>> {
            Err(CustodianError::unavailable("connection refused"))
        }

        async fn generate_data_key(
            &self,
            _: &KeyRef,
            _: DataKeySpec,
        ) -> trussrod_custodian::Result<DataKey> {
            Err(CustodianError::unavailable("connection refused"))
        }

        async fn sign(
            &self,
            _: &KeyRef,
            _: &Digest,
            _: SigningAlgorithm,
        ) -> trussrod_custodian::Result<Vec<u8>> {
            Err(CustodianError::unavailable("connection refused"))
        }

        async fn verify(
            &self,
            _: &KeyRef,
            _: &Digest,
            _: &[u8],
            _: SigningAlgorithm,
        ) -> trussrod_custodian::Result<bool> {
            Err(CustodianError::unavailable("connection refused"))
        }
    }

    fn ts(text: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(text).unwrap()
    }

    fn note() -> NoteInput {
        NoteInput {
            note_id: "note-1".into(),
            doctor_id: "doc-7".into(),
            patient_id: "pat-42".into(),
            appointment_id: String::new(),
            document_type: "progress_note".into(),
            content: "BP 120/80, continue current medication.".into(),
            created_at: ts("2024-03-01T10:00:00+01:00"),
            signed_at: ts("2024-03-01T10:15:00+01:00"),
            signed_with: "custodian".into(),
            attachments: vec![AttachmentInput {
                key: "uploads/ecg.pdf".into(),
                filename: "ecg.pdf".into(),
                content: b"%PDF-1.7".to_vec(),
            }],
        }
    }

    fn orchestrator(
        custodian: Arc<dyn KeyCustodian>,
        algorithm: SigningAlgorithm,
    ) -> SigningOrchestrator {
        let config = SigningConfig::builder()
            .key_ref(TEST_SIGNING_KEY_REF)
            .algorithm(algorithm)
            .build()
            .unwrap();
        SigningOrchestrator::new(custodian, config)
    }

    #[tokio::test]
    async fn test_sign_produces_complete_record() {
        let custodian = CountingCustodian::new();
        let signer = orchestrator(custodian.clone(), SigningAlgorithm::RsassaPssSha256);

        let record = signer.sign(&note()).await.unwrap();

        assert_eq!(record.key_ref.as_str(), TEST_SIGNING_KEY_REF);
        assert_eq!(record.algorithm, SigningAlgorithm::RsassaPssSha256);
        assert_eq!(record.canonical_version, CanonicalVersion::V1);
        assert_eq!(record.digest, Digest::sha256(&signer.canonical_bytes(&note()).unwrap()));
        assert_eq!(record.signature.len(), 256);
        assert_eq!(record.signed_at.nanosecond(), 0);
        assert_eq!(custodian.signs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_verify_signed_document_is_true() {
        for algorithm in
            [SigningAlgorithm::RsassaPssSha256, SigningAlgorithm::RsassaPkcs1V15Sha256]
        {
            let custodian = CountingCustodian::new();
            let signer = orchestrator(custodian.clone(), algorithm);

            let record = signer.sign(&note()).await.unwrap();
            assert!(signer.verify(&note(), &record).await.unwrap(), "{algorithm}");
            assert_eq!(custodian.verifies.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_content_mutation_is_false_without_custodian_call() {
        let custodian = CountingCustodian::new();
        let signer = orchestrator(custodian.clone(), SigningAlgorithm::RsassaPssSha256);
        let record = signer.sign(&note()).await.unwrap();

        let original = note().content.into_bytes();
        for index in 0..original.len() {
            let mut mutated = original.clone();
            mutated[index] ^= 0x01;
            let Ok(content) = String::from_utf8(mutated) else { continue };

            let document = NoteInput { content, ..note() };
            assert!(!signer.verify(&document, &record).await.unwrap(), "byte {index}");
        }
        assert_eq!(
            custodian.verifies.load(Ordering::SeqCst),
            0,
            "mismatch must be decided locally"
        );
    }

    #[tokio::test]
    async fn test_attachment_swap_is_false() {
        let custodian = CountingCustodian::new();
        let signer = orchestrator(custodian.clone(), SigningAlgorithm::RsassaPssSha256);
        let record = signer.sign(&note()).await.unwrap();

        let mut document = note();
        document.attachments[0].content = b"%PDF-1.7 forged".to_vec();
        assert!(!signer.verify(&document, &record).await.unwrap());
        assert_eq!(custodian.verifies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_equivalent_document_in_other_offset_verifies() {
        let signer = orchestrator(CountingCustodian::new(), SigningAlgorithm::RsassaPssSha256);
        let record = signer.sign(&note()).await.unwrap();

        let document = NoteInput {
            created_at: ts("2024-03-01T09:00:00Z"),
            signed_at: ts("2024-03-01T04:15:00.250-05:00"),
            ..note()
        };
        assert!(signer.verify(&document, &record).await.unwrap());
    }

    #[tokio::test]
    async fn test_forged_signature_is_false_from_custodian() {
        let custodian = CountingCustodian::new();
        let signer = orchestrator(custodian.clone(), SigningAlgorithm::RsassaPssSha256);
        let mut record = signer.sign(&note()).await.unwrap();
        record.signature[10] ^= 0xff;

        assert!(!signer.verify(&note(), &record).await.unwrap());
        assert_eq!(custodian.verifies.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custodian_failure_is_an_error_not_false() {
        let signer = orchestrator(CountingCustodian::new(), SigningAlgorithm::RsassaPssSha256);
        let record = signer.sign(&note()).await.unwrap();

        let offline =
            orchestrator(Arc::new(UnavailableCustodian), SigningAlgorithm::RsassaPssSha256);
        let result = offline.verify(&note(), &record).await;
        match result {
            Err(err @ SigningError::Custodian(CustodianError::Unavailable { .. })) => {
                assert!(err.is_transient());
            },
            other => panic!("expected custodian error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sign_failure_passes_through() {
        let offline =
            orchestrator(Arc::new(UnavailableCustodian), SigningAlgorithm::RsassaPssSha256);
        let result = offline.sign(&note()).await;
        assert!(matches!(result, Err(SigningError::Custodian(CustodianError::Unavailable { .. }))));
    }

    #[tokio::test]
    async fn test_malformed_document_rejected_before_custodian() {
        let custodian = CountingCustodian::new();
        let signer = orchestrator(custodian.clone(), SigningAlgorithm::RsassaPssSha256);

        let result = signer.sign(&NoteInput { patient_id: String::new(), ..note() }).await;
        assert!(matches!(result, Err(SigningError::MalformedInput { .. })));
        assert_eq!(custodian.signs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sign_document_pairs_bytes_and_record() {
        let signer = orchestrator(CountingCustodian::new(), SigningAlgorithm::RsassaPssSha256);

        let signed = signer.sign_document(&note()).await.unwrap();
        assert!(signed.is_intact());
        assert_eq!(signed.canonical, signer.canonical_bytes(&note()).unwrap());
        assert!(signer.verify(&note(), &signed.record).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_signing_key_passes_through() {
        let config = SigningConfig::builder().key_ref("alias/retired").build().unwrap();
        let signer = SigningOrchestrator::new(CountingCustodian::new(), config);

        let result = signer.sign(&note()).await;
        assert!(matches!(
            result,
            Err(SigningError::Custodian(CustodianError::KeyNotFound { ref key_ref }))
                if key_ref == "alias/retired"
        ));
    }
}
