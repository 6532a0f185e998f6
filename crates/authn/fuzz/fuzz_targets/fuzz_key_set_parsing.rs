//! Fuzz target for key-set document parsing.
//!
//! Feeds arbitrary bytes as a key-set response body. Every result must be
//! either a (possibly empty) key map or `Err(AuthError)`; malformed entries
//! are skipped, never fatal, and never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use trussrod_authn::jwks::parse_key_set;

fuzz_target!(|data: &[u8]| {
    let Ok(keys) = parse_key_set(data) else {
        return;
    };

    for (kid, key) in &keys {
        assert_eq!(kid, key.kid());
        assert!(!key.modulus().is_empty());
        let _ = key.exponent_u64();
    }
});
