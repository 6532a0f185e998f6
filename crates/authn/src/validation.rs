//! JWT algorithm and key-id validation.
//!
//! This module provides security checks that run on the raw token header,
//! before any key lookup or signature work.
//!
//! # Security
//!
//! - The `alg` string is checked as published, so `none` and other values that the JWT library
//!   cannot even represent are still rejected with [`AuthError::UnsupportedAlgorithm`].
//! - Symmetric algorithms and `none` are always rejected, regardless of configuration.
//! - Only RSA signature algorithms can be allow-listed, since the key set only carries RSA keys.

use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted for security reasons.
///
/// - `none`: No signature verification (trivially bypassable)
/// - `HS256`, `HS384`, `HS512`: Symmetric algorithms. A verifier that accepts them can be fooled
///   into using a published RSA public key as an HMAC secret.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms that may appear in a validator's allow-list.
///
/// These are the RSA algorithms that can be verified with the `n`/`e`
/// components published in the key set.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["RS256", "RS384", "RS512", "PS256", "PS384", "PS512"];

/// Maximum accepted length of a `kid` header value.
pub const MAX_KID_LENGTH: usize = 256;

/// Validate a JWT `alg` header value against security policy and an allow-list.
///
/// Checks run in this order:
/// 1. [`FORBIDDEN_ALGORITHMS`] are always rejected
/// 2. The value must be one of [`ACCEPTED_ALGORITHMS`]
/// 3. The value must be in `allowed`
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if any check fails.
///
/// # Examples
///
/// ```
/// use jsonwebtoken::Algorithm;
/// use trussrod_authn::validation::validate_algorithm;
///
/// assert_eq!(validate_algorithm("RS256", &[Algorithm::RS256]).unwrap(), Algorithm::RS256);
///
/// // Well-formed but not allow-listed
/// assert!(validate_algorithm("RS384", &[Algorithm::RS256]).is_err());
///
/// // Never accepted
/// assert!(validate_algorithm("none", &[Algorithm::RS256]).is_err());
/// assert!(validate_algorithm("HS256", &[Algorithm::RS256]).is_err());
/// ```
pub fn validate_algorithm(alg: &str, allowed: &[Algorithm]) -> Result<Algorithm, AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{}' is not allowed for security reasons",
            alg
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{}' is not in accepted list",
            alg
        )));
    }

    let algorithm = Algorithm::from_str(alg).map_err(|_| {
        AuthError::unsupported_algorithm(format!("Algorithm '{}' is not recognized", alg))
    })?;

    if !allowed.contains(&algorithm) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{}' is not enabled for this validator",
            alg
        )));
    }

    Ok(algorithm)
}

/// Validate the shape of a `kid` header value.
///
/// The key id is used only as a lookup key, but it is attacker-controlled
/// and ends up in logs, so it must be non-empty, bounded in length and made
/// of printable ASCII without whitespace.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKeyId`] if the value is empty, longer than
/// [`MAX_KID_LENGTH`], or contains characters outside `'!'..='~'`.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::invalid_key_id("kid cannot be empty"));
    }

    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::invalid_key_id(format!(
            "kid exceeds maximum length of {} bytes",
            MAX_KID_LENGTH
        )));
    }

    if !kid.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(AuthError::invalid_key_id("kid contains non-printable characters"));
    }

    Ok(())
}

/// Parse a list of algorithm names into allow-list entries.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if the list is empty or any entry is not
/// one of [`ACCEPTED_ALGORITHMS`].
pub fn parse_allowed_algorithms<S: AsRef<str>>(names: &[S]) -> Result<Vec<Algorithm>, AuthError> {
    if names.is_empty() {
        return Err(AuthError::config("at least one algorithm must be allowed"));
    }

    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            if !ACCEPTED_ALGORITHMS.contains(&name) {
                return Err(AuthError::config(format!(
                    "algorithm '{}' cannot be allow-listed",
                    name
                )));
            }
            Algorithm::from_str(name)
                .map_err(|_| AuthError::config(format!("unknown algorithm '{}'", name)))
        })
        .collect()
}
