//! HTTP custodian configuration.
//!
//! ```toml
//! endpoint = "https://custodian.internal:8443"
//! request_timeout = "10s"
//! connect_timeout = "3s"
//! ```

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{CustodianError, Result};

/// Default per-request timeout for custodian calls (10 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default TCP connect timeout for custodian calls (3 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration for an [`HttpKeyCustodian`](crate::HttpKeyCustodian).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trussrod_custodian::HttpCustodianConfig;
///
/// let config = HttpCustodianConfig::builder()
///     .endpoint("https://custodian.internal:8443")
///     .request_timeout(Duration::from_secs(5))
///     .build()?;
/// assert_eq!(config.connect_timeout(), Duration::from_secs(3));
/// # Ok::<(), trussrod_custodian::CustodianError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpCustodianConfig {
    /// Base URL of the custodian service.
    pub(crate) endpoint: String,

    /// Timeout for a whole request, from connect to body.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) request_timeout: Duration,

    /// Timeout for establishing the connection.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

#[bon::bon]
impl HttpCustodianConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`CustodianError::Config`] if the endpoint is not an absolute
    /// `http`/`https` URL or a timeout is zero.
    #[builder]
    pub fn new(
        #[builder(into)] endpoint: String,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
    ) -> Result<Self> {
        let config = Self { endpoint, request_timeout, connect_timeout };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks invariants, for configurations obtained through serde.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;
        if self.request_timeout.is_zero() {
            return Err(CustodianError::config("request_timeout must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(CustodianError::config("connect_timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub(crate) fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(self.endpoint.trim()).map_err(|e| {
            CustodianError::config(format!("invalid endpoint '{}': {}", self.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(CustodianError::config(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        Ok(url)
    }
}
