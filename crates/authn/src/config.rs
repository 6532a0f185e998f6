//! Token validator configuration.
//!
//! Built in code through the [`bon`] builder, or deserialized from a
//! configuration file with `humantime` durations:
//!
//! ```toml
//! jwks_url = "https://issuer.example/.well-known/jwks.json"
//! issuer = "https://issuer.example"
//! audience = "app-1"
//! leeway = "2m"
//! jwks_ttl = "10m"
//! allowed_algorithms = ["RS256"]
//! ```

use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AuthError, Result},
    jwks::{DEFAULT_FETCH_TIMEOUT, DEFAULT_KEY_SET_TTL},
    validation::parse_allowed_algorithms,
};

/// Default clock-skew leeway applied to `exp` and `nbf` (2 minutes).
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(120);

/// Path of the key set relative to the issuer.
pub const WELL_KNOWN_JWKS_PATH: &str = "/.well-known/jwks.json";

/// Configuration for a [`TokenValidator`](crate::TokenValidator).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trussrod_authn::ValidatorConfig;
///
/// let config = ValidatorConfig::builder()
///     .jwks_url("https://issuer.example/.well-known/jwks.json")
///     .issuer("https://issuer.example")
///     .audience("app-1")
///     .leeway(Duration::from_secs(60))
///     .build()?;
/// assert_eq!(config.audience(), Some("app-1"));
/// # Ok::<(), trussrod_authn::AuthError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorConfig {
    /// Key-set URL.
    pub(crate) jwks_url: String,

    /// Expected `iss` value, compared exactly.
    pub(crate) issuer: String,

    /// Expected client identifier; audience is not checked when absent.
    #[serde(default)]
    pub(crate) audience: Option<String>,

    /// Symmetric leeway for `exp` and `nbf`.
    #[serde(with = "humantime_serde", default = "default_leeway")]
    pub(crate) leeway: Duration,

    /// Key-set snapshot time-to-live.
    #[serde(with = "humantime_serde", default = "default_jwks_ttl")]
    pub(crate) jwks_ttl: Duration,

    /// HTTP timeout for a key-set fetch.
    #[serde(with = "humantime_serde", default = "default_fetch_timeout")]
    pub(crate) fetch_timeout: Duration,

    /// Minimum snapshot age before an unknown `kid` triggers a refetch.
    #[serde(with = "humantime_serde", default)]
    pub(crate) min_refresh_interval: Duration,

    /// Allow-listed `alg` values.
    #[serde(default = "default_allowed_algorithms")]
    pub(crate) allowed_algorithms: Vec<String>,
}

fn default_leeway() -> Duration {
    DEFAULT_LEEWAY
}

fn default_jwks_ttl() -> Duration {
    DEFAULT_KEY_SET_TTL
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

fn default_allowed_algorithms() -> Vec<String> {
    vec!["RS256".to_owned()]
}

#[bon::bon]
impl ValidatorConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `audience` - Expected client id (default: not checked).
    /// * `leeway` - Clock-skew leeway (default: 2 minutes).
    /// * `jwks_ttl` - Snapshot TTL (default: 10 minutes).
    /// * `fetch_timeout` - Key-set HTTP timeout (default: 5 seconds).
    /// * `min_refresh_interval` - Refetch throttle for unknown kids (default: none).
    /// * `allowed_algorithms` - Allow-list (default: `RS256`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if:
    /// - `jwks_url` or `issuer` is empty
    /// - `audience` is present but empty
    /// - `jwks_ttl` or `fetch_timeout` is zero
    /// - an allow-listed algorithm is not an accepted RSA algorithm
    #[builder]
    pub fn new(
        #[builder(into)] jwks_url: String,
        #[builder(into)] issuer: String,
        #[builder(into)] audience: Option<String>,
        #[builder(default = DEFAULT_LEEWAY)] leeway: Duration,
        #[builder(default = DEFAULT_KEY_SET_TTL)] jwks_ttl: Duration,
        #[builder(default = DEFAULT_FETCH_TIMEOUT)] fetch_timeout: Duration,
        #[builder(default)] min_refresh_interval: Duration,
        #[builder(
            default = default_allowed_algorithms(),
            with = |iter: impl IntoIterator<Item = impl Into<String>>| {
                iter.into_iter().map(Into::into).collect()
            }
        )]
        allowed_algorithms: Vec<String>,
    ) -> Result<Self> {
        let config = Self {
            jwks_url,
            issuer,
            audience,
            leeway,
            jwks_ttl,
            fetch_timeout,
            min_refresh_interval,
            allowed_algorithms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration for an issuer that publishes its key set at
    /// `{issuer}/.well-known/jwks.json`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn for_issuer(issuer: impl Into<String>, audience: Option<String>) -> Result<Self> {
        let issuer = issuer.into();
        Self::builder()
            .jwks_url(jwks_url_for_issuer(&issuer))
            .issuer(issuer)
            .maybe_audience(audience)
            .build()
    }
}

impl ValidatorConfig {
    /// Re-checks invariants, for configurations obtained through serde.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<()> {
        if self.jwks_url.trim().is_empty() {
            return Err(AuthError::config("jwks_url cannot be empty"));
        }
        if self.issuer.trim().is_empty() {
            return Err(AuthError::config("issuer cannot be empty"));
        }
        if self.audience.as_deref().is_some_and(|audience| audience.trim().is_empty()) {
            return Err(AuthError::config("audience cannot be empty when set"));
        }
        if self.jwks_ttl.is_zero() {
            return Err(AuthError::config("jwks_ttl must be greater than zero"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(AuthError::config("fetch_timeout must be greater than zero"));
        }
        parse_allowed_algorithms(&self.allowed_algorithms)?;
        Ok(())
    }

    /// Returns the key-set URL.
    #[must_use]
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Returns the expected issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the expected audience if configured.
    #[must_use]
    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Returns the clock-skew leeway.
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Returns the key-set TTL.
    #[must_use]
    pub fn jwks_ttl(&self) -> Duration {
        self.jwks_ttl
    }

    /// Returns the key-set fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Returns the minimum refresh interval for unknown kids.
    #[must_use]
    pub fn min_refresh_interval(&self) -> Duration {
        self.min_refresh_interval
    }

    /// Returns the allow-listed algorithms.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] for a deserialized configuration that
    /// names an algorithm [`validate`](Self::validate) would reject.
    pub fn allowed_algorithms(&self) -> Result<Vec<Algorithm>> {
        parse_allowed_algorithms(&self.allowed_algorithms)
    }
}

/// Builds `{issuer}/.well-known/jwks.json`, ignoring a trailing slash on the issuer.
#[must_use]
pub fn jwks_url_for_issuer(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), WELL_KNOWN_JWKS_PATH)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ValidatorConfig::builder()
            .jwks_url("https://issuer.example/.well-known/jwks.json")
            .issuer("https://issuer.example")
            .build()
            .unwrap();

        assert_eq!(config.audience(), None);
        assert_eq!(config.leeway(), DEFAULT_LEEWAY);
        assert_eq!(config.jwks_ttl(), Duration::from_secs(600));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.min_refresh_interval(), Duration::ZERO);
        assert_eq!(config.allowed_algorithms().unwrap(), vec![Algorithm::RS256]);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ValidatorConfig::builder()
            .jwks_url("https://issuer.example/keys")
            .issuer("https://issuer.example")
            .audience("app-1")
            .leeway(Duration::ZERO)
            .allowed_algorithms(["RS256", "PS256"])
            .build()
            .unwrap();

        assert_eq!(config.audience(), Some("app-1"));
        assert_eq!(config.leeway(), Duration::ZERO);
        assert_eq!(config.allowed_algorithms().unwrap(), vec![Algorithm::RS256, Algorithm::PS256]);
    }

    #[test]
    fn test_builder_rejects_empty_issuer() {
        let result = ValidatorConfig::builder().jwks_url("https://x/keys").issuer("").build();
        assert!(matches!(
            result,
            Err(AuthError::Config { ref message }) if message.contains("issuer")
        ));
    }

    #[test]
    fn test_builder_rejects_empty_audience() {
        let result = ValidatorConfig::builder()
            .jwks_url("https://x/keys")
            .issuer("https://x")
            .audience("")
            .build();
        assert!(matches!(result, Err(AuthError::Config { .. })));
    }

    #[test]
    fn test_builder_rejects_symmetric_algorithm() {
        let result = ValidatorConfig::builder()
            .jwks_url("https://x/keys")
            .issuer("https://x")
            .allowed_algorithms(["RS256", "HS256"])
            .build();
        assert!(matches!(
            result,
            Err(AuthError::Config { ref message }) if message.contains("HS256")
        ));
    }

    #[test]
    fn test_builder_rejects_zero_ttl() {
        let result = ValidatorConfig::builder()
            .jwks_url("https://x/keys")
            .issuer("https://x")
            .jwks_ttl(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(AuthError::Config { .. })));
    }

    #[test]
    fn test_for_issuer_derives_jwks_url() {
        let config = ValidatorConfig::for_issuer("https://issuer.example/", Some("app-1".into()))
            .unwrap();
        assert_eq!(config.jwks_url(), "https://issuer.example/.well-known/jwks.json");
        assert_eq!(config.issuer(), "https://issuer.example/");
        assert_eq!(config.audience(), Some("app-1"));
    }

    #[test]
    fn test_deserialize_with_humantime() {
        let config: ValidatorConfig = serde_json::from_str(
            r#"{
                "jwks_url": "https://issuer.example/.well-known/jwks.json",
                "issuer": "https://issuer.example",
                "leeway": "30s",
                "jwks_ttl": "5m",
                "min_refresh_interval": "1m"
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.leeway(), Duration::from_secs(30));
        assert_eq!(config.jwks_ttl(), Duration::from_secs(300));
        assert_eq!(config.min_refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.fetch_timeout(), DEFAULT_FETCH_TIMEOUT);
        assert_eq!(config.allowed_algorithms().unwrap(), vec![Algorithm::RS256]);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result: std::result::Result<ValidatorConfig, _> = serde_json::from_str(
            r#"{"jwks_url": "u", "issuer": "i", "algorithms": ["none"]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialized_config_validation_catches_bad_algorithms() {
        let config: ValidatorConfig = serde_json::from_str(
            r#"{"jwks_url": "u", "issuer": "i", "allowed_algorithms": ["none"]}"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(AuthError::Config { .. })));
    }
}
