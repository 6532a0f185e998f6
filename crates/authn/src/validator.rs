//! Token validation pipeline.
//!
//! [`TokenValidator`] verifies a bearer token against the remote key set and
//! enforces the claim-level trust rules:
//!
//! 1. Split the token and decode the raw header
//! 2. Check `alg` against the forbidden list and the allow-list
//! 3. Require a well-formed `kid`
//! 4. Resolve the key through [`KeySetCache`]
//! 5. Verify the signature with the algorithm pinned to the allow-listed `alg`
//! 6. Check the issuer, the time window (with leeway), the audience and the token use
//!
//! Every step has its own [`AuthError`] variant. The validator holds no
//! mutable state and is shared freely across tasks.

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;

use crate::{
    claims::{
        ACCESS_TOKEN_USE, AccessClaims, IDENTITY_TOKEN_USE, IdentityClaims, RegisteredClaims,
        TokenClaims,
    },
    config::ValidatorConfig,
    error::{AuthError, Result},
    jwks::KeySetCache,
    validation::{validate_algorithm, validate_kid},
};

/// Header fields read before any verification.
///
/// `alg` stays a string so values the JWT library cannot represent (such as
/// `none`) reach the algorithm policy instead of failing as format errors.
#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: Option<String>,
    kid: Option<String>,
}

/// Verifies bearer tokens against a [`KeySetCache`].
#[derive(Debug, Clone)]
pub struct TokenValidator {
    keys: Arc<KeySetCache>,
    issuer: String,
    audience: Option<String>,
    leeway: Duration,
    allowed_algorithms: Vec<Algorithm>,
}

impl TokenValidator {
    /// Creates a validator that resolves keys through an existing cache.
    ///
    /// Several validators (for example one per audience) can share one cache.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid.
    pub fn new(keys: Arc<KeySetCache>, config: &ValidatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys,
            issuer: config.issuer().to_owned(),
            audience: config.audience().map(str::to_owned),
            leeway: config.leeway(),
            allowed_algorithms: config.allowed_algorithms()?,
        })
    }

    /// Creates a validator with its own key-set cache built from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &ValidatorConfig) -> Result<Self> {
        let keys = KeySetCache::with_timeout(
            config.jwks_url(),
            config.jwks_ttl(),
            config.fetch_timeout(),
        )?
        .with_min_refresh_interval(config.min_refresh_interval());
        Self::new(Arc::new(keys), config)
    }

    /// The key-set cache this validator uses.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeySetCache> {
        &self.keys
    }

    /// Validates an access token.
    ///
    /// # Errors
    ///
    /// Any pipeline error, or [`AuthError::TokenUseMismatch`] if the token is
    /// not an access token.
    #[tracing::instrument(skip(self, token))]
    pub async fn validate_access(&self, token: &str) -> Result<AccessClaims> {
        let result = match self.verify(token).await {
            Ok(TokenClaims::Access(claims)) => Ok(claims),
            Ok(other) => Err(AuthError::token_use_mismatch(ACCESS_TOKEN_USE, other.token_use())),
            Err(err) => Err(err),
        };
        log_outcome(&result, ACCESS_TOKEN_USE);
        result
    }

    /// Validates an identity token.
    ///
    /// # Errors
    ///
    /// Any pipeline error, or [`AuthError::TokenUseMismatch`] if the token is
    /// not an identity token.
    #[tracing::instrument(skip(self, token))]
    pub async fn validate_identity(&self, token: &str) -> Result<IdentityClaims> {
        let result = match self.verify(token).await {
            Ok(TokenClaims::Identity(claims)) => Ok(claims),
            Ok(other) => Err(AuthError::token_use_mismatch(IDENTITY_TOKEN_USE, other.token_use())),
            Err(err) => Err(err),
        };
        log_outcome(&result, IDENTITY_TOKEN_USE);
        result
    }

    /// Runs the full pipeline except the entry-point `token_use` check.
    ///
    /// # Errors
    ///
    /// See the module documentation for the checks and their errors.
    pub async fn verify(&self, token: &str) -> Result<TokenClaims> {
        // 1. Structure and raw header
        let header = decode_raw_header(token)?;

        // 2. Algorithm policy on the published string
        let alg = header.alg.as_deref().ok_or_else(|| {
            AuthError::invalid_token_format("JWT header missing 'alg' field")
        })?;
        let algorithm = validate_algorithm(alg, &self.allowed_algorithms)?;

        // 3. Key id
        let kid = header
            .kid
            .ok_or_else(|| AuthError::invalid_key_id("JWT header missing 'kid' field"))?;
        validate_kid(&kid)?;

        // 4. Key lookup (may refresh the key set)
        let key = self.keys.get(&kid).await?;

        // 5. Signature, pinned to the allow-listed algorithm
        let payload = verify_signature(token, key.decoding_key(), algorithm)?;

        // 6. Claims
        let iss = payload
            .get("iss")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AuthError::missing_claim("iss"))?;
        if iss != self.issuer {
            return Err(AuthError::invalid_issuer(format!(
                "expected '{}', got '{}'",
                self.issuer, iss
            )));
        }
        match payload.get("exp") {
            None | Some(serde_json::Value::Null) => return Err(AuthError::missing_claim("exp")),
            Some(exp) if !exp.is_number() => {
                return Err(AuthError::invalid_token_format("'exp' must be a NumericDate"));
            },
            Some(_) => {},
        }

        let claims = TokenClaims::from_payload(payload)?;
        validate_time_claims(claims.registered(), Utc::now().timestamp(), self.leeway)?;
        self.validate_audience(&claims)?;

        tracing::debug!(
            kid = %kid,
            token_use = claims.token_use(),
            "token signature and claims verified"
        );
        Ok(claims)
    }

    fn validate_audience(&self, claims: &TokenClaims) -> Result<()> {
        let Some(expected) = self.audience.as_deref() else {
            return Ok(());
        };

        let (accepted, actual) = match claims {
            TokenClaims::Access(access) => {
                (access.client_id == expected, Some(access.client_id.clone()))
            },
            TokenClaims::Identity(identity) => {
                let audiences = identity.audiences();
                let actual = (!audiences.is_empty()).then(|| audiences.join(", "));
                (identity.is_issued_for(expected), actual)
            },
        };

        match (accepted, actual) {
            (true, _) => Ok(()),
            (false, Some(actual)) => Err(AuthError::invalid_audience(format!(
                "expected '{}', got '{}'",
                expected, actual
            ))),
            (false, None) => Err(AuthError::invalid_audience(format!(
                "expected '{}', token carries no client identifier",
                expected
            ))),
        }
    }
}

fn log_outcome<T>(result: &Result<T>, token_use: &str) {
    match result {
        Ok(_) => tracing::debug!(token_use, "token accepted"),
        Err(err) if err.is_transient() => {
            tracing::warn!(token_use, error = %err, "token validation failed on key set fetch")
        },
        Err(err) => tracing::warn!(token_use, error = %err, "token rejected"),
    }
}

/// Decodes the header segment of a three-part token without verification.
fn decode_raw_header(token: &str) -> Result<RawHeader> {
    let mut parts = token.split('.');
    let (Some(header), Some(_payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots"));
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT header: {}", e))
    })?;

    serde_json::from_slice(&header_bytes).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to parse JWT header: {}", e))
    })
}

/// Verifies the signature and returns the raw payload.
///
/// Only the signature and algorithm are checked here; time, issuer and
/// audience are enforced by the caller with their own errors.
fn verify_signature(
    token: &str,
    key: &jsonwebtoken::DecodingKey,
    algorithm: Algorithm,
) -> Result<serde_json::Value> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<serde_json::Value>(token, key, &validation)?;
    Ok(data.claims)
}

/// Checks `exp` and `nbf` against `now` with a symmetric leeway.
///
/// A token is expired when `exp < now - leeway`, so `exp == now - leeway`
/// is still accepted. It is not yet valid when `nbf > now + leeway`.
///
/// # Errors
///
/// Returns [`AuthError::TokenExpired`] or [`AuthError::TokenNotYetValid`].
pub fn validate_time_claims(claims: &RegisteredClaims, now: i64, leeway: Duration) -> Result<()> {
    let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);

    if claims.exp < now.saturating_sub(leeway) {
        return Err(AuthError::token_expired());
    }

    if let Some(nbf) = claims.nbf
        && nbf > now.saturating_add(leeway)
    {
        return Err(AuthError::token_not_yet_valid());
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::testutil::{
        KeySetServer, TEST_CLIENT_ID, TEST_ISSUER, access_claims, craft_raw_jwt,
        identity_claims, jwk_set, mint_token, now_secs, test_jwk,
    };

    const LEEWAY: Duration = Duration::from_secs(120);
    const NOW: i64 = 1_700_000_000;

    fn registered(exp: i64, nbf: Option<i64>) -> RegisteredClaims {
        RegisteredClaims {
            iss: TEST_ISSUER.to_owned(),
            sub: "user-1".to_owned(),
            exp,
            nbf,
            iat: None,
            jti: None,
        }
    }

    #[rstest]
    #[case::comfortably_valid(NOW + 600, true)]
    #[case::exactly_now(NOW, true)]
    #[case::inside_leeway(NOW - 60, true)]
    #[case::at_leeway_boundary(NOW - 120, true)]
    #[case::one_second_past_leeway(NOW - 121, false)]
    #[case::long_expired(NOW - 600, false)]
    fn test_expiry_leeway(#[case] exp: i64, #[case] accepted: bool) {
        let result = validate_time_claims(&registered(exp, None), NOW, LEEWAY);
        if accepted {
            assert!(result.is_ok(), "exp={exp} should be accepted, got {result:?}");
        } else {
            assert!(matches!(result, Err(AuthError::TokenExpired)), "got {result:?}");
        }
    }

    #[rstest]
    #[case::in_past(NOW - 10, true)]
    #[case::at_leeway_boundary(NOW + 120, true)]
    #[case::one_second_past_leeway(NOW + 121, false)]
    fn test_not_before_leeway(#[case] nbf: i64, #[case] accepted: bool) {
        let result = validate_time_claims(&registered(NOW + 600, Some(nbf)), NOW, LEEWAY);
        if accepted {
            assert!(result.is_ok(), "nbf={nbf} should be accepted, got {result:?}");
        } else {
            assert!(matches!(result, Err(AuthError::TokenNotYetValid)), "got {result:?}");
        }
    }

    #[test]
    fn test_zero_leeway_is_exact() {
        assert!(validate_time_claims(&registered(NOW, None), NOW, Duration::ZERO).is_ok());
        assert!(validate_time_claims(&registered(NOW - 1, None), NOW, Duration::ZERO).is_err());
    }

    #[rstest]
    #[case::empty("")]
    #[case::two_parts("a.b")]
    #[case::four_parts("a.b.c.d")]
    #[case::bad_base64("!!!.b.c")]
    #[case::not_json("bm90LWpzb24.b.c")]
    fn test_decode_raw_header_malformed(#[case] token: &str) {
        assert!(matches!(decode_raw_header(token), Err(AuthError::InvalidTokenFormat { .. })));
    }

    #[test]
    fn test_decode_raw_header_keeps_unknown_alg() {
        let token = craft_raw_jwt(&json!({"alg": "none", "kid": "k1"}), &json!({}));
        let header = decode_raw_header(&token).unwrap();
        assert_eq!(header.alg.as_deref(), Some("none"));
        assert_eq!(header.kid.as_deref(), Some("k1"));
    }

    fn validator_for(server: &KeySetServer) -> TokenValidator {
        let config = ValidatorConfig::builder()
            .jwks_url(server.url())
            .issuer(TEST_ISSUER)
            .audience(TEST_CLIENT_ID)
            .build()
            .unwrap();
        TokenValidator::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_valid_access_token() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let token = mint_token(Algorithm::RS256, "k1", &access_claims(now_secs() + 600));
        let claims = validator.validate_access(&token).await.unwrap();

        assert_eq!(claims.client_id, TEST_CLIENT_ID);
        assert_eq!(claims.username.as_deref(), Some("dr-who"));
        assert!(claims.in_group("doctors"));
    }

    #[tokio::test]
    async fn test_valid_identity_token() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let token = mint_token(Algorithm::RS256, "k1", &identity_claims(now_secs() + 600));
        let claims = validator.validate_identity(&token).await.unwrap();

        assert_eq!(claims.email.as_deref(), Some("who@example.com"));
        assert!(claims.email_verified);
    }

    #[tokio::test]
    async fn test_wrong_issuer() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = access_claims(now_secs() + 600);
        claims["iss"] = json!("https://issuer.example/");
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let result = validator.validate_access(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidIssuer { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn test_missing_issuer() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = access_claims(now_secs() + 600);
        claims.as_object_mut().unwrap().remove("iss");
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let result = validator.validate_access(&token).await;
        assert!(matches!(result, Err(AuthError::MissingClaim { ref claim }) if claim == "iss"));
    }

    #[tokio::test]
    async fn test_wrong_audience() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = access_claims(now_secs() + 600);
        claims["client_id"] = json!("app-2");
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let result = validator.validate_access(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidAudience { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn test_identity_audience_uses_aud() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = identity_claims(now_secs() + 600);
        claims["aud"] = json!("someone-else");
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let result = validator.validate_identity(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidAudience { .. })), "got {result:?}");
    }

    #[rstest]
    #[case::single_element_array(json!([TEST_CLIENT_ID]))]
    #[case::multi_element_array(json!(["app-0", TEST_CLIENT_ID, "app-9"]))]
    #[tokio::test]
    async fn test_identity_aud_array_accepted(#[case] aud: serde_json::Value) {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = identity_claims(now_secs() + 600);
        claims["aud"] = aud;
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let identity = validator.validate_identity(&token).await.unwrap();
        assert!(identity.is_issued_for(TEST_CLIENT_ID));
    }

    #[tokio::test]
    async fn test_identity_aud_array_without_client_rejected() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = identity_claims(now_secs() + 600);
        claims["aud"] = json!(["app-0", "app-9"]);
        claims["client_id"] = json!(TEST_CLIENT_ID);
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let result = validator.validate_identity(&token).await;
        assert!(
            matches!(
                result,
                Err(AuthError::InvalidAudience { ref message }) if message.contains("app-0, app-9")
            ),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_identity_without_aud_falls_back_to_client_id() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = identity_claims(now_secs() + 600);
        claims.as_object_mut().unwrap().remove("aud");
        claims["client_id"] = json!(TEST_CLIENT_ID);
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        assert!(validator.validate_identity(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_fractional_exp_accepted() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = access_claims(now_secs() + 600);
        claims["exp"] = json!(now_secs() as f64 + 600.5);
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let access = validator.validate_access(&token).await.unwrap();
        assert!(access.registered.exp >= now_secs() + 599);
    }

    #[tokio::test]
    async fn test_fractional_exp_in_past_expired() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = access_claims(now_secs() + 600);
        claims["exp"] = json!(now_secs() as f64 - 600.5);
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let result = validator.validate_access(&token).await;
        assert!(matches!(result, Err(AuthError::TokenExpired)), "got {result:?}");
    }

    #[rstest]
    #[case::absent(None)]
    #[case::null(Some(json!(null)))]
    #[tokio::test]
    async fn test_missing_exp(#[case] exp: Option<serde_json::Value>) {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = access_claims(now_secs() + 600);
        match exp {
            Some(value) => claims["exp"] = value,
            None => {
                claims.as_object_mut().unwrap().remove("exp");
            },
        }
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let result = validator.validate_access(&token).await;
        assert!(matches!(result, Err(AuthError::MissingClaim { ref claim }) if claim == "exp"));
    }

    #[tokio::test]
    async fn test_non_numeric_exp_is_format_error() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut claims = access_claims(now_secs() + 600);
        claims["exp"] = json!("2030-01-01T00:00:00Z");
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        let result = validator.validate_access(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidTokenFormat { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn test_audience_not_checked_when_unconfigured() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let config = ValidatorConfig::builder()
            .jwks_url(server.url())
            .issuer(TEST_ISSUER)
            .build()
            .unwrap();
        let validator = TokenValidator::from_config(&config).unwrap();

        let mut claims = access_claims(now_secs() + 600);
        claims["client_id"] = json!("any-client");
        let token = mint_token(Algorithm::RS256, "k1", &claims);

        assert!(validator.validate_access(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_kid() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let mut header = jsonwebtoken::Header::new(Algorithm::RS256);
        header.kid = None;
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(
            crate::testutil::TEST_RSA_PRIVATE_KEY_PEM.as_bytes(),
        )
        .unwrap();
        let token =
            jsonwebtoken::encode(&header, &access_claims(now_secs() + 600), &key).unwrap();

        let result = validator.validate_access(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidKeyId { .. })), "got {result:?}");
        assert_eq!(server.request_count(), 0, "no fetch before the kid is validated");
    }

    #[tokio::test]
    async fn test_unknown_kid() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let validator = validator_for(&server);

        let token = mint_token(Algorithm::RS256, "k9", &access_claims(now_secs() + 600));
        let result = validator.validate_access(&token).await;
        assert!(matches!(result, Err(AuthError::KeyNotFound { ref kid }) if kid == "k9"));
    }

    #[tokio::test]
    async fn test_validators_share_cache() {
        let server = KeySetServer::start(jwk_set([test_jwk("k1")])).await;
        let keys = Arc::new(KeySetCache::new(server.url(), Duration::from_secs(600)).unwrap());

        let access_config = ValidatorConfig::builder()
            .jwks_url(server.url())
            .issuer(TEST_ISSUER)
            .build()
            .unwrap();
        let first = TokenValidator::new(Arc::clone(&keys), &access_config).unwrap();
        let second = TokenValidator::new(Arc::clone(&keys), &access_config).unwrap();

        let token = mint_token(Algorithm::RS256, "k1", &access_claims(now_secs() + 600));
        first.validate_access(&token).await.unwrap();
        second.validate_access(&token).await.unwrap();

        assert_eq!(server.request_count(), 1);
        assert!(Arc::ptr_eq(first.keys(), second.keys()));
    }
}
