//! HTTP key custodian client.
//!
//! JSON over HTTP to a custodian service:
//!
//! | Operation           | Request                          |
//! |---------------------|----------------------------------|
//! | `decrypt`           | `POST /v1/decrypt`               |
//! | `generate_data_key` | `POST /v1/keys/{key}/data-keys`  |
//! | `sign`              | `POST /v1/keys/{key}/sign`       |
//! | `verify`            | `POST /v1/keys/{key}/verify`     |
//!
//! Binary fields are standard base64. A non-success status carries
//! `{ "error": "..." }`, surfaced unmodified as [`CustodianError::Remote`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use zeroize::Zeroizing;

use crate::{
    config::HttpCustodianConfig,
    custodian::KeyCustodian,
    encoding,
    error::{CustodianError, Result},
    types::{DataKey, DataKeySpec, Digest, KeyRef, SigningAlgorithm},
};

// ==================== Custodian Service API Types ====================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DecryptRequest {
    pub(crate) ciphertext_blob: String, // base64 encoded
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DecryptResponse {
    pub(crate) plaintext: String, // base64 encoded
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateDataKeyRequest {
    pub(crate) key_spec: DataKeySpec,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateDataKeyResponse {
    pub(crate) plaintext: String,       // base64 encoded
    pub(crate) ciphertext_blob: String, // base64 encoded
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignRequest {
    pub(crate) digest: String, // base64 encoded
    pub(crate) signing_algorithm: SigningAlgorithm,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignResponse {
    pub(crate) signature: String, // base64 encoded
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyRequest {
    pub(crate) digest: String,    // base64 encoded
    pub(crate) signature: String, // base64 encoded
    pub(crate) signing_algorithm: SigningAlgorithm,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyResponse {
    pub(crate) signature_valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

// ==================== HTTP Custodian ====================

/// Key custodian reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeyCustodian {
    client: Client,
    base_url: Url,
}

impl HttpKeyCustodian {
    /// Creates a client with the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`CustodianError::Config`] if the endpoint is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: &HttpCustodianConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| CustodianError::config(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(config, client)
    }

    /// Creates a custodian client around an existing `reqwest` client.
    ///
    /// The client's own timeouts apply; those in `config` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CustodianError::Config`] if the endpoint is invalid.
    pub fn with_client(config: &HttpCustodianConfig, client: Client) -> Result<Self> {
        let base_url = config.endpoint_url()?;
        Ok(Self { client, base_url })
    }

    /// Returns the base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds `{base}/{segments...}`, percent-encoding each segment.
    ///
    /// Key references such as `alias/notes` or ARNs stay a single path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CustodianError::config("endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<Req, Resp>(&self, url: Url, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        fail::fail_point!("custodian-before-request", |_| {
            Err(CustodianError::unavailable("injected failure before custodian request"))
        });

        let response = self.client.post(url).json(request).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "custodian request timed out"
            } else {
                "custodian request failed"
            };
            CustodianError::unavailable_with_source(message, e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => Some(body),
                Err(e) => {
                    tracing::debug!(error = %e, "failed to read custodian error body");
                    None
                },
            };
            let message = remote_message(status, body);
            tracing::warn!(
                status = status.as_u16(),
                error = %message,
                "custodian rejected request"
            );
            return Err(CustodianError::remote(status.as_u16(), message));
        }

        response.json().await.map_err(|e| {
            CustodianError::malformed_response(format!("failed to parse response: {e}"))
        })
    }
}

/// Message for a non-success response. Prefers the JSON `error` field and
/// falls back to the raw body, then to the status reason.
fn remote_message(status: StatusCode, body: Option<String>) -> String {
    let reason = status.canonical_reason().unwrap_or("unknown error");
    let Some(body) = body else {
        return format!("{reason} (response body unreadable)");
    };
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => error.error,
        Err(_) if body.is_empty() => reason.to_owned(),
        Err(_) => body,
    }
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>> {
    encoding::decode(value).map_err(|e| {
        CustodianError::malformed_response(format!("invalid base64 in '{field}': {e}"))
    })
}

#[async_trait]
impl KeyCustodian for HttpKeyCustodian {
    #[tracing::instrument(skip_all, fields(blob_len = ciphertext.len()))]
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let url = self.url(&["v1", "decrypt"])?;
        let request = DecryptRequest { ciphertext_blob: encoding::encode(ciphertext) };

        let response: DecryptResponse = self.post(url, &request).await?;
        let plaintext = Zeroizing::new(response.plaintext);
        decode_field("plaintext", &plaintext).map(Zeroizing::new)
    }

    #[tracing::instrument(skip(self), fields(key_ref = %key_ref))]
    async fn generate_data_key(&self, key_ref: &KeyRef, spec: DataKeySpec) -> Result<DataKey> {
        let url = self.url(&["v1", "keys", key_ref.as_str(), "data-keys"])?;
        let request = GenerateDataKeyRequest { key_spec: spec };

        let response: GenerateDataKeyResponse = self.post(url, &request).await?;
        let encoded = Zeroizing::new(response.plaintext);
        let plaintext = Zeroizing::new(decode_field("plaintext", &encoded)?);
        if plaintext.len() != spec.key_len() {
            return Err(CustodianError::malformed_response(format!(
                "{} data key must be {} bytes, got {}",
                spec.as_str(),
                spec.key_len(),
                plaintext.len()
            )));
        }
        let ciphertext = decode_field("ciphertextBlob", &response.ciphertext_blob)?;

        tracing::debug!(spec = spec.as_str(), "data key generated");
        Ok(DataKey::new(plaintext, ciphertext))
    }

    #[tracing::instrument(skip(self, digest), fields(key_ref = %key_ref))]
    async fn sign(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>> {
        let url = self.url(&["v1", "keys", key_ref.as_str(), "sign"])?;
        let request = SignRequest {
            digest: encoding::encode(digest.as_bytes()),
            signing_algorithm: algorithm,
        };

        let response: SignResponse = self.post(url, &request).await?;
        decode_field("signature", &response.signature)
    }

    #[tracing::instrument(skip(self, digest, signature), fields(key_ref = %key_ref))]
    async fn verify(
        &self,
        key_ref: &KeyRef,
        digest: &Digest,
        signature: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<bool> {
        let url = self.url(&["v1", "keys", key_ref.as_str(), "verify"])?;
        let request = VerifyRequest {
            digest: encoding::encode(digest.as_bytes()),
            signature: encoding::encode(signature),
            signing_algorithm: algorithm,
        };

        let response: VerifyResponse = self.post(url, &request).await?;
        Ok(response.signature_valid)
    }
}
