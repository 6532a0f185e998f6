//! Remote key-set cache for token verification.
//!
//! This module provides [`KeySetCache`], which fetches a published JSON Web
//! Key Set over HTTP, keeps the usable RSA keys in an immutable snapshot,
//! and resolves a `kid` to a [`PublicKey`].
//!
//! # Architecture
//!
//! ```text
//! get(kid) → read lock, clone snapshot Arc
//!          → snapshot fresh and contains kid? return key
//!          → otherwise fetch document (no lock held)
//!          → parse usable entries into a new map
//!          → write lock, swap snapshot, expiry = now + ttl
//!          → kid present? return key : KeyNotFound
//! ```
//!
//! # Concurrency
//!
//! Readers never see a partially built key set: a refresh builds the whole
//! map first and only then replaces the snapshot pointer. Concurrent misses
//! may each fetch the document; the last completed fetch wins.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use trussrod_authn::KeySetCache;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = KeySetCache::new(
//!     "https://issuer.example/.well-known/jwks.json",
//!     Duration::from_secs(600),
//! )?;
//! let key = cache.get("k1").await?;
//! println!("exponent = {}", key.exponent_u64()?);
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use fail::fail_point;
use jsonwebtoken::DecodingKey;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, Result};

/// Default key-set time-to-live (10 minutes).
pub const DEFAULT_KEY_SET_TTL: Duration = Duration::from_secs(600);

/// Default HTTP timeout for a key-set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum width, in bytes, of an exponent that can be folded into a `u64`.
const MAX_EXPONENT_BYTES: usize = 8;

/// A verified-usable RSA public key from the key set.
///
/// The modulus and exponent are the unsigned big-endian bytes exactly as
/// decoded from the published `n` and `e` values.
#[derive(Clone)]
pub struct PublicKey {
    kid: String,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
    algorithm: Option<String>,
    decoding_key: DecodingKey,
}

impl PublicKey {
    /// Builds a key from raw big-endian modulus and exponent bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPublicKey`] if either component is empty
    /// or the exponent is wider than eight bytes.
    pub fn from_components(
        kid: impl Into<String>,
        modulus: Vec<u8>,
        exponent: Vec<u8>,
        algorithm: Option<String>,
    ) -> Result<Self> {
        if modulus.is_empty() {
            return Err(AuthError::invalid_public_key("modulus is empty"));
        }
        if exponent.is_empty() {
            return Err(AuthError::invalid_public_key("exponent is empty"));
        }
        if exponent.len() > MAX_EXPONENT_BYTES {
            return Err(AuthError::invalid_public_key(format!(
                "exponent is {} bytes, at most {} supported",
                exponent.len(),
                MAX_EXPONENT_BYTES
            )));
        }

        let decoding_key = DecodingKey::from_rsa_raw_components(&modulus, &exponent);
        Ok(Self { kid: kid.into(), modulus, exponent, algorithm, decoding_key })
    }

    /// Key identifier.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Modulus bytes, big-endian, as published.
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Exponent bytes, big-endian, as published.
    #[must_use]
    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    /// The `alg` hint published with the key, if any.
    #[must_use]
    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// Key in the form the JWT library verifies with.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Integer value of the public exponent.
    ///
    /// All bytes are folded big-endian; the byte length determines the
    /// width, so `AQAB` (`01 00 01`) is 65537 and `Aw` (`03`) is 3.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPublicKey`] if the exponent is wider than
    /// eight bytes.
    pub fn exponent_u64(&self) -> Result<u64> {
        exponent_value(&self.exponent)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("kid", &self.kid)
            .field("modulus_bits", &(self.modulus.len() * 8))
            .field("exponent", &self.exponent)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Folds big-endian bytes into a `u64`.
fn exponent_value(bytes: &[u8]) -> Result<u64> {
    if bytes.len() > MAX_EXPONENT_BYTES {
        return Err(AuthError::invalid_public_key(format!(
            "exponent is {} bytes, at most {} supported",
            bytes.len(),
            MAX_EXPONENT_BYTES
        )));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// An immutable snapshot of the key set.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<PublicKey>>,
    fetched_at: Option<Instant>,
    expires_at: Option<Instant>,
}

impl KeySet {
    fn new(keys: HashMap<String, Arc<PublicKey>>, now: Instant, ttl: Duration) -> Self {
        Self { keys, fetched_at: Some(now), expires_at: Some(now + ttl) }
    }

    /// Returns the key for `kid`, if present.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<PublicKey>> {
        self.keys.get(kid).cloned()
    }

    /// Number of usable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no usable keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key identifiers in this snapshot, sorted.
    #[must_use]
    pub fn kids(&self) -> Vec<&str> {
        let mut kids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        kids.sort_unstable();
        kids
    }

    /// Returns `true` if the snapshot has never been fetched or its TTL has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now >= expires_at)
    }

    fn fetched_within(&self, now: Instant, interval: Duration) -> bool {
        self.fetched_at
            .is_some_and(|fetched_at| now.saturating_duration_since(fetched_at) < interval)
    }
}

/// Cache over a remote key set.
///
/// Owned by whoever constructs it and shared through `Arc`; there is no
/// process-wide instance.
pub struct KeySetCache {
    url: String,
    ttl: Duration,
    min_refresh_interval: Duration,
    client: reqwest::Client,
    snapshot: RwLock<Arc<KeySet>>,
    fetch_count: AtomicU64,
}

impl KeySetCache {
    /// Creates a cache for `url` with the default fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the URL is empty or the HTTP client
    /// cannot be built.
    pub fn new(url: impl Into<String>, ttl: Duration) -> Result<Self> {
        Self::with_timeout(url, ttl, DEFAULT_FETCH_TIMEOUT)
    }

    /// Creates a cache for `url` with an explicit fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the URL is empty or the HTTP client
    /// cannot be built.
    pub fn with_timeout(url: impl Into<String>, ttl: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::config(format!("failed to build HTTP client: {}", e)))?;
        Self::with_client(url, ttl, client)
    }

    /// Creates a cache that fetches through a caller-supplied client.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the URL is empty.
    pub fn with_client(
        url: impl Into<String>,
        ttl: Duration,
        client: reqwest::Client,
    ) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(AuthError::config("key set URL cannot be empty"));
        }

        Ok(Self {
            url,
            ttl,
            min_refresh_interval: Duration::ZERO,
            client,
            snapshot: RwLock::new(Arc::new(KeySet::default())),
            fetch_count: AtomicU64::new(0),
        })
    }

    /// Sets the minimum age a fresh snapshot must reach before an unknown
    /// `kid` triggers another fetch.
    ///
    /// With the default of zero every miss refetches. An expired snapshot is
    /// always refetched regardless of this setting.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Key-set URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Snapshot time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolves `kid` to a public key, refreshing the key set on a miss or
    /// after expiry.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeySetFetch`] if the endpoint is unreachable or returns a non-success status
    /// - [`AuthError::MalformedKeySet`] if the document cannot be parsed
    /// - [`AuthError::KeyNotFound`] if `kid` is absent after the refresh
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    pub async fn get(&self, kid: &str) -> Result<Arc<PublicKey>> {
        let now = Instant::now();
        let current = self.snapshot();

        if !current.is_expired(now) {
            if let Some(key) = current.get(kid) {
                tracing::debug!(cache = "snapshot", "cache hit");
                return Ok(key);
            }

            if current.fetched_within(now, self.min_refresh_interval) {
                tracing::debug!("unknown kid within minimum refresh interval, not refetching");
                return Err(AuthError::key_not_found(kid));
            }
        }

        tracing::debug!(cache = "snapshot", expired = current.is_expired(now), "cache miss");

        let refreshed = self.refresh().await?;
        refreshed.get(kid).ok_or_else(|| {
            tracing::warn!(kid, known = ?refreshed.kids(), "kid not present after refresh");
            AuthError::key_not_found(kid)
        })
    }

    /// Like [`get`](Self::get), but returns [`AuthError::Cancelled`] as soon
    /// as `cancel` fires.
    ///
    /// A fetch in flight is abandoned; the previous snapshot stays in place.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get), plus [`AuthError::Cancelled`].
    pub async fn get_cancellable(
        &self,
        kid: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<PublicKey>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(kid, "key lookup cancelled");
                Err(AuthError::Cancelled)
            },
            result = self.get(kid) => result,
        }
    }

    /// Fetches the key set and replaces the snapshot.
    ///
    /// On any error the previous snapshot is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeySetFetch`] or [`AuthError::MalformedKeySet`].
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    pub async fn refresh(&self) -> Result<Arc<KeySet>> {
        let keys = self.fetch().await?;

        let snapshot = Arc::new(KeySet::new(keys, Instant::now(), self.ttl));
        *self.snapshot.write() = Arc::clone(&snapshot);

        tracing::info!(key_count = snapshot.len(), ttl = ?self.ttl, "key set refreshed");
        Ok(snapshot)
    }

    /// Marks the current snapshot expired so the next lookup refetches.
    ///
    /// Keys stay readable through [`snapshot`](Self::snapshot) until then.
    #[tracing::instrument(skip(self))]
    pub fn invalidate(&self) {
        let mut guard = self.snapshot.write();
        let keys = guard.keys.clone();
        *guard = Arc::new(KeySet { keys, fetched_at: None, expires_at: None });
        tracing::info!("key set invalidated");
    }

    /// Current snapshot, fresh or not.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySet> {
        Arc::clone(&self.snapshot.read())
    }

    /// Number of keys in the current snapshot.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Number of fetches attempted since construction.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    async fn fetch(&self) -> Result<HashMap<String, Arc<PublicKey>>> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        fail_point!("keyset-before-fetch", |_| {
            Err(AuthError::key_set_fetch("fail point: keyset-before-fetch"))
        });

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            tracing::warn!(error = %e, "key set request failed");
            AuthError::key_set_fetch_with_source("key set request failed", e)
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "key set endpoint returned non-success status");
            return Err(AuthError::key_set_fetch(format!(
                "key set endpoint returned status {}",
                status
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            AuthError::key_set_fetch_with_source("failed to read key set body", e)
        })?;

        parse_key_set(&body)
    }
}

impl fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySetCache")
            .field("url", &self.url)
            .field("ttl", &self.ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .field("key_count", &self.key_count())
            .field("fetch_count", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct KeySetDocument {
    keys: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawJwk {
    kty: Option<String>,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    alg: Option<String>,
}

/// Parses a key-set document into usable keys.
///
/// Entries that are not usable RSA signing keys are skipped with a warning;
/// only a document that is not a JSON object with a `keys` array fails.
/// When a `kid` appears more than once the first usable entry wins.
///
/// # Errors
///
/// Returns [`AuthError::MalformedKeySet`] if the document itself cannot be parsed.
pub fn parse_key_set(body: &[u8]) -> Result<HashMap<String, Arc<PublicKey>>> {
    let document: KeySetDocument = serde_json::from_slice(body)
        .map_err(|e| AuthError::malformed_key_set(format!("invalid key set document: {}", e)))?;

    let mut keys = HashMap::with_capacity(document.keys.len());
    for (index, entry) in document.keys.into_iter().enumerate() {
        let key = match parse_entry(entry) {
            Ok(Some(key)) => key,
            Ok(None) => continue,
            Err(reason) => {
                tracing::warn!(index, reason = %reason, "skipping malformed key set entry");
                continue;
            },
        };

        if keys.contains_key(key.kid()) {
            tracing::warn!(index, kid = key.kid(), "duplicate kid in key set, keeping first");
            continue;
        }
        keys.insert(key.kid().to_owned(), Arc::new(key));
    }

    Ok(keys)
}

/// `Ok(None)` means the entry is well-formed but not an RSA signing key.
fn parse_entry(entry: serde_json::Value) -> std::result::Result<Option<PublicKey>, String> {
    let raw: RawJwk = serde_json::from_value(entry).map_err(|e| e.to_string())?;

    if raw.kty.as_deref() != Some("RSA") {
        tracing::debug!(kty = ?raw.kty, kid = ?raw.kid, "skipping non-RSA key");
        return Ok(None);
    }
    if let Some(key_use) = raw.key_use.as_deref()
        && key_use != "sig"
    {
        tracing::debug!(key_use, kid = ?raw.kid, "skipping key not meant for signatures");
        return Ok(None);
    }

    let kid = raw.kid.filter(|kid| !kid.is_empty()).ok_or("missing kid")?;
    let n = raw.n.filter(|n| !n.is_empty()).ok_or_else(|| format!("kid {kid}: missing n"))?;
    let e = raw.e.filter(|e| !e.is_empty()).ok_or_else(|| format!("kid {kid}: missing e"))?;

    let modulus = decode_base64url(&n).map_err(|err| format!("kid {kid}: n: {err}"))?;
    let exponent = decode_base64url(&e).map_err(|err| format!("kid {kid}: e: {err}"))?;

    PublicKey::from_components(kid.clone(), modulus, exponent, raw.alg)
        .map(Some)
        .map_err(|err| format!("kid {kid}: {err}"))
}

/// Decodes unpadded base64url, tolerating trailing `=` padding.
fn decode_base64url(value: &str) -> std::result::Result<Vec<u8>, String> {
    let bytes =
        URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')).map_err(|e| e.to_string())?;
    if bytes.is_empty() {
        return Err("decodes to zero bytes".to_owned());
    }
    Ok(bytes)
}
