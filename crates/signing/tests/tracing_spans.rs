//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on signing and verification.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use chrono::DateTime;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};
use trussrod_custodian::testutil::{TEST_SIGNING_KEY_REF, test_custodian};
use trussrod_signing::{NoteInput, SigningConfig, SigningOrchestrator};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn signer() -> SigningOrchestrator {
    let config = SigningConfig::builder().key_ref(TEST_SIGNING_KEY_REF).build().expect("config");
    SigningOrchestrator::new(Arc::new(test_custodian()), config)
}

fn note() -> NoteInput {
    let at = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z").expect("timestamp");
    NoteInput {
        note_id: "note-1".into(),
        doctor_id: "doc-1".into(),
        patient_id: "pat-1".into(),
        appointment_id: String::new(),
        document_type: "progress_note".into(),
        content: "Stable.".into(),
        created_at: at,
        signed_at: at,
        signed_with: "custodian".into(),
        attachments: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_creates_orchestrator_and_custodian_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    signer().sign(&note()).await.expect("sign");

    let recorded = spans.lock().expect("lock poisoned");
    assert_eq!(recorded.iter().filter(|s| *s == "sign").count(), 2, "got: {recorded:?}");
}

#[tokio::test]
async fn verify_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let signer = signer();
    let record = signer.sign(&note()).await.expect("sign");
    assert!(signer.verify(&note(), &record).await.expect("verify"));

    let recorded = spans.lock().expect("lock poisoned");
    assert!(
        recorded.iter().any(|s| s == "verify"),
        "expected a 'verify' span, got: {recorded:?}"
    );
}

#[tokio::test]
async fn sign_document_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    signer().sign_document(&note()).await.expect("sign");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(
        recorded.iter().any(|s| s == "sign_document"),
        "expected a 'sign_document' span, got: {recorded:?}"
    );
}
