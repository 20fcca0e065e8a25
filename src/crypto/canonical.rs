//! Canonical payload serialization and hashing
//!
//! Commands are canonicalized with RFC 8785 JSON Canonicalization Scheme
//! (JCS) before signing: deterministic key ordering, ES6 number
//! serialization, no whitespace. The canonical byte sequence is what gets
//! signed and what must be re-derivable later for verification.

use sha2::{Digest, Sha256};

use crate::domain::Hash256;

/// Domain prefix for command payload hashing
pub const DOMAIN_COMMAND_PAYLOAD: &[u8] = b"NOTARY_COMMAND_V1";

/// Errors from payload canonicalization
#[derive(Debug, thiserror::Error)]
pub enum CanonicalizeError {
    #[error("payload is not canonicalizable JSON: {0}")]
    InvalidJson(String),
}

/// Convert a JSON value to its canonical string representation per RFC 8785.
///
/// Fails only for values JCS cannot represent (NaN, Infinity).
pub fn canonicalize_json(value: &serde_json::Value) -> Result<String, CanonicalizeError> {
    serde_json_canonicalizer::to_string(value)
        .map_err(|e| CanonicalizeError::InvalidJson(e.to_string()))
}

/// SHA-256 over the domain prefix and the canonical payload bytes.
///
/// This hash is what the signing backend actually signs, keeping signature
/// input fixed-size regardless of payload size.
pub fn payload_signing_hash(canonical_payload: &str) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_COMMAND_PAYLOAD);
    hasher.update(canonical_payload.as_bytes());
    hasher.finalize().into()
}
