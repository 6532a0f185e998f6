//! # Trussrod Key Custodian
//!
//! Client side of a key custodian: a service that exclusively holds master
//! keys and performs data-key generation, unwrapping and digest signing on
//! behalf of callers.
//!
//! This crate provides:
//! - **[`KeyCustodian`]**: the capability trait every provider implements
//! - **[`HttpKeyCustodian`]**: JSON-over-HTTP client for a remote custodian
//! - **[`MemoryKeyCustodian`]**: in-process provider for tests and local development
//! - **[`envelope`]**: AES-256-GCM envelope encryption on top of any provider
//!
//! Plaintext data keys are zeroized on drop and never appear in `Debug`
//! output.
//!
//! ## Example
//!
//! ```no_run
//! use trussrod_custodian::{
//!     Digest, HttpCustodianConfig, HttpKeyCustodian, KeyCustodian, KeyRef, SigningAlgorithm,
//! };
//!
//! # async fn example() -> Result<(), trussrod_custodian::CustodianError> {
//! let config = HttpCustodianConfig::builder().endpoint("https://custodian.internal").build()?;
//! let custodian = HttpKeyCustodian::new(&config)?;
//!
//! let key = KeyRef::from("alias/notes-signing");
//! let digest = Digest::sha256(b"canonical bytes");
//! let signature = custodian.sign(&key, &digest, SigningAlgorithm::RsassaPssSha256).await?;
//! assert!(custodian.verify(&key, &digest, &signature, SigningAlgorithm::RsassaPssSha256).await?);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aead;
/// HTTP custodian configuration.
pub mod config;
/// The custodian capability trait.
pub mod custodian;
/// Serde helpers for binary fields.
pub mod encoding;
/// Envelope encryption over a custodian.
pub mod envelope;
/// Custodian error types.
pub mod error;
/// HTTP custodian client.
pub mod http;
/// In-process custodian.
pub mod memory;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Key references, algorithms, digests and data keys.
pub mod types;

// Re-export key types for convenience
pub use config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, HttpCustodianConfig};
pub use custodian::KeyCustodian;
pub use envelope::Envelope;
pub use error::{CustodianError, Result};
pub use http::HttpKeyCustodian;
pub use memory::MemoryKeyCustodian;
pub use types::{DataKey, DataKeySpec, Digest, KeyRef, SigningAlgorithm};
