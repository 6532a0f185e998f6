//! # Trussrod Authentication
//!
//! Bearer token validation against a remotely published, rotating key set.
//!
//! This crate provides:
//! - **Key-set cache**: HTTP-fetched JSON Web Key Set held in an atomically swapped snapshot
//! - **Token validation**: signature, issuer, audience, time window and token-use checks
//! - **Algorithm validation**: allow-listing of RSA algorithms on the raw header
//!
//! ## Features
//!
//! - Only RSA algorithms (RS256/384/512, PS256/384/512) can be allow-listed
//! - `none` and symmetric algorithms (HS256, etc.) are always rejected
//! - Access and identity tokens are distinct claim types selected by `token_use`
//!
//! ## Example
//!
//! ```no_run
//! use trussrod_authn::{TokenValidator, ValidatorConfig};
//!
//! # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let config =
//!     ValidatorConfig::for_issuer("https://issuer.example", Some("app-1".to_owned()))?;
//! let validator = TokenValidator::from_config(&config)?;
//!
//! let claims = validator.validate_access(token).await?;
//! println!("client: {}, scopes: {:?}", claims.client_id, claims.scopes());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Access and identity claims.
pub mod claims;
/// Validator configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Remote key-set cache.
pub mod jwks;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Algorithm and key-id validation.
pub mod validation;
/// Token validation pipeline.
pub mod validator;

// Re-export key types for convenience
pub use claims::{AccessClaims, IdentityClaims, RegisteredClaims, TokenClaims};
pub use config::{DEFAULT_LEEWAY, ValidatorConfig, jwks_url_for_issuer};
pub use error::{AuthError, Result};
pub use jwks::{DEFAULT_FETCH_TIMEOUT, DEFAULT_KEY_SET_TTL, KeySet, KeySetCache, PublicKey};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
pub use validator::{TokenValidator, validate_time_claims};
