//! Serde helpers for binary fields.
//!
//! Binary values on the wire and in persisted records are standard-alphabet
//! base64 strings with padding.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

/// Encodes bytes as a standard base64 string.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a standard base64 string.
///
/// # Errors
///
/// Returns the underlying decode error for invalid input.
pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

/// `#[serde(with = "trussrod_custodian::encoding::base64_bytes")]` for `Vec<u8>` fields.
pub mod base64_bytes {
    use super::*;

    /// Serializes bytes as base64.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    /// Deserializes bytes from base64.
    ///
    /// # Errors
    ///
    /// Fails on non-string input or invalid base64.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    }

    #[test]
    fn test_uses_standard_alphabet_with_padding() {
        let blob = Blob { data: vec![0xfb, 0xff, 0xfe, 0x01] };
        let json = serde_json::to_string(&blob).unwrap();
        assert_eq!(json, r#"{"data":"+//+AQ=="}"#);

        let back: Blob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, blob);
    }

    #[test]
    fn test_rejects_url_safe_alphabet() {
        let result: Result<Blob, _> = serde_json::from_str(r#"{"data":"-__-AQ=="}"#);
        assert!(result.is_err());
    }
}
