//! Structured fuzz target for token header and claim checks.
//!
//! Uses `arbitrary` to generate plausible token headers and payloads, then
//! runs the checks that happen before and after signature verification:
//! algorithm policy, `kid` shape, claim decoding and time windows. `aud`
//! is generated in both string and array form, and the time claims may be
//! fractional.

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use jsonwebtoken::Algorithm;
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value, json};
use trussrod_authn::{
    TokenClaims, validate_algorithm, validate_time_claims, validation::validate_kid,
};

#[derive(Debug, Arbitrary)]
struct FuzzedToken {
    alg: FuzzedAlg,
    kid: Option<String>,
    iss: String,
    sub: Option<String>,
    token_use: FuzzedUse,
    client_id: Option<String>,
    aud: Option<FuzzedAud>,
    exp: FuzzedDate,
    nbf: Option<FuzzedDate>,
    iat: Option<FuzzedDate>,
    scope: Option<String>,
    groups: Vec<String>,
    email_verified: Option<bool>,
    now: i64,
    leeway_secs: u16,
}

/// Algorithm names covering confusion attacks and the RSA family.
#[derive(Debug, Arbitrary)]
enum FuzzedAlg {
    None,
    NoneUpper,
    HS256,
    RS256,
    RS384,
    PS256,
    ES256,
    Other(String),
}

impl FuzzedAlg {
    fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::NoneUpper => "NONE",
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::PS256 => "PS256",
            Self::ES256 => "ES256",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Arbitrary)]
enum FuzzedAud {
    One(String),
    Many(Vec<String>),
}

impl FuzzedAud {
    fn to_json(&self) -> Value {
        match self {
            Self::One(aud) => json!(aud),
            Self::Many(auds) => json!(auds),
        }
    }

    /// Whether an identity token carrying this `aud` and `client_id` is
    /// issued for `client_id`. An empty list falls back to `client_id`.
    fn issues_for(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(auds) => auds.is_empty() || auds.iter().any(|aud| aud == client_id),
        }
    }
}

#[derive(Debug, Arbitrary)]
enum FuzzedDate {
    Whole(i64),
    Fractional(f64),
}

impl FuzzedDate {
    fn to_json(&self) -> Value {
        match self {
            Self::Whole(secs) => json!(secs),
            Self::Fractional(secs) => json!(secs),
        }
    }
}

#[derive(Debug, Arbitrary)]
enum FuzzedUse {
    Access,
    Id,
    Missing,
    Other(String),
}

fn payload(input: &FuzzedToken) -> Value {
    let mut payload = Map::new();
    payload.insert("iss".into(), json!(input.iss));
    payload.insert("exp".into(), input.exp.to_json());
    match &input.token_use {
        FuzzedUse::Access => {
            payload.insert("token_use".into(), json!("access"));
        },
        FuzzedUse::Id => {
            payload.insert("token_use".into(), json!("id"));
        },
        FuzzedUse::Missing => {},
        FuzzedUse::Other(other) => {
            payload.insert("token_use".into(), json!(other));
        },
    }
    let optional = [
        ("sub", input.sub.as_ref().map(|v| json!(v))),
        ("client_id", input.client_id.as_ref().map(|v| json!(v))),
        ("aud", input.aud.as_ref().map(FuzzedAud::to_json)),
        ("nbf", input.nbf.as_ref().map(FuzzedDate::to_json)),
        ("iat", input.iat.as_ref().map(FuzzedDate::to_json)),
        ("scope", input.scope.as_ref().map(|v| json!(v))),
        ("email_verified", input.email_verified.map(|v| json!(v))),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            payload.insert(name.into(), value);
        }
    }
    if !input.groups.is_empty() {
        payload.insert("cognito:groups".into(), json!(input.groups));
    }
    Value::Object(payload)
}

fuzz_target!(|input: FuzzedToken| {
    let alg = input.alg.as_str();
    if let Ok(algorithm) = validate_algorithm(alg, &[Algorithm::RS256, Algorithm::PS256]) {
        assert!(matches!(algorithm, Algorithm::RS256 | Algorithm::PS256), "{alg} accepted");
    }
    assert!(validate_algorithm(alg, &[Algorithm::RS256]).is_err() || alg == "RS256");

    if let Some(kid) = &input.kid {
        if validate_kid(kid).is_ok() {
            assert!(!kid.is_empty() && kid.bytes().all(|b| b.is_ascii_graphic()));
        }
    }

    let Ok(claims) = TokenClaims::from_payload(payload(&input)) else {
        return;
    };
    if let (TokenClaims::Identity(identity), Some(aud)) = (&claims, &input.aud) {
        if let Some(client_id) = &input.client_id {
            assert_eq!(identity.is_issued_for(client_id), aud.issues_for(client_id));
        }
    }
    let leeway = Duration::from_secs(u64::from(input.leeway_secs));
    let _ = validate_time_claims(claims.registered(), input.now, leeway);
});
