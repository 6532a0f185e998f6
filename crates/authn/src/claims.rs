//! Token claims.
//!
//! Verified tokens carry one of two claim shapes, selected by the
//! `token_use` discriminator:
//!
//! ```json
//! { "token_use": "access", "client_id": "app-1", "scope": "notes/read", ... }
//! { "token_use": "id", "aud": "app-1", "email": "who@example.com", ... }
//! ```
//!
//! `aud` may be a single string or an array of strings, and the time claims
//! may carry a fractional part (floored to whole seconds).
//!
//! [`TokenClaims`] is the tagged union of both; [`AccessClaims`] and
//! [`IdentityClaims`] are the variant payloads returned by the validator's
//! entry points.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AuthError;

/// `token_use` value of access tokens.
pub const ACCESS_TOKEN_USE: &str = "access";

/// `token_use` value of identity tokens.
pub const IDENTITY_TOKEN_USE: &str = "id";

/// Registered claims shared by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    /// Issuer.
    pub iss: String,
    /// Subject.
    #[serde(default)]
    pub sub: String,
    /// Expiration time (Unix seconds).
    #[serde(deserialize_with = "numeric_date")]
    pub exp: i64,
    /// Not-before time (Unix seconds).
    #[serde(
        default,
        deserialize_with = "optional_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,
    /// Issued-at time (Unix seconds).
    #[serde(
        default,
        deserialize_with = "optional_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,
    /// Token identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Claims of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Registered claims.
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    /// Client the token was issued to.
    pub client_id: String,
    /// Space-separated scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Group memberships.
    #[serde(rename = "cognito:groups", default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Username of the authenticated principal.
    #[serde(
        rename = "cognito:username",
        alias = "username",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<String>,
}

impl AccessClaims {
    /// Splits the `scope` claim on whitespace.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scope.as_deref().map(|scope| scope.split_whitespace().collect()).unwrap_or_default()
    }

    /// Returns `true` if the token grants `scope`.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(&scope)
    }

    /// Returns `true` if the principal belongs to `group`.
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Claims of an identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Registered claims.
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    /// Audiences (the client ids the token was minted for).
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    /// Client id, when the issuer sends it alongside or instead of `aud`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Whether the email address was verified by the issuer.
    #[serde(default)]
    pub email_verified: bool,
    /// Phone number.
    #[serde(alias = "phone", default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Gender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl IdentityClaims {
    /// The client identifiers the token was issued for: `aud`, falling back
    /// to `client_id` when `aud` is absent.
    #[must_use]
    pub fn audiences(&self) -> Vec<&str> {
        if self.aud.is_empty() {
            self.client_id.as_deref().into_iter().collect()
        } else {
            self.aud.iter().map(String::as_str).collect()
        }
    }

    /// Returns `true` if the token was issued for `client_id`.
    #[must_use]
    pub fn is_issued_for(&self, client_id: &str) -> bool {
        self.audiences().contains(&client_id)
    }
}

/// A NumericDate as it appears on the wire.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumericDate {
    Seconds(i64),
    Fractional(f64),
}

impl NumericDate {
    fn floor(self) -> i64 {
        match self {
            Self::Seconds(seconds) => seconds,
            // Saturates outside the i64 range
            Self::Fractional(seconds) => seconds.floor() as i64,
        }
    }
}

fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    NumericDate::deserialize(deserializer).map(NumericDate::floor)
}

fn optional_numeric_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    Ok(Option::<NumericDate>::deserialize(deserializer)?.map(NumericDate::floor))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

/// Verified claims, tagged by `token_use`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "token_use")]
pub enum TokenClaims {
    /// `token_use = "access"`.
    #[serde(rename = "access")]
    Access(AccessClaims),
    /// `token_use = "id"`.
    #[serde(rename = "id")]
    Identity(IdentityClaims),
}

impl TokenClaims {
    /// Decodes a verified payload into the variant named by its `token_use`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingClaim`] if `token_use` is absent or not a string
    /// - [`AuthError::InvalidTokenFormat`] for an unknown `token_use` or a payload that does not
    ///   fit the selected variant
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, AuthError> {
        let token_use = payload
            .get("token_use")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AuthError::missing_claim("token_use"))?;

        if token_use != ACCESS_TOKEN_USE && token_use != IDENTITY_TOKEN_USE {
            return Err(AuthError::invalid_token_format(format!(
                "unknown token_use '{}'",
                token_use
            )));
        }

        serde_json::from_value(payload).map_err(|e| {
            AuthError::invalid_token_format(format!("Failed to parse token claims: {}", e))
        })
    }

    /// The `token_use` value of this variant.
    #[must_use]
    pub fn token_use(&self) -> &'static str {
        match self {
            Self::Access(_) => ACCESS_TOKEN_USE,
            Self::Identity(_) => IDENTITY_TOKEN_USE,
        }
    }

    /// Registered claims of either variant.
    #[must_use]
    pub fn registered(&self) -> &RegisteredClaims {
        match self {
            Self::Access(claims) => &claims.registered,
            Self::Identity(claims) => &claims.registered,
        }
    }
}
