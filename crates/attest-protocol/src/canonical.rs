//! Canonical JSON (RFC 8785) and digest helpers.
//!
//! Every byte string that is signed or hashed goes through here so that the
//! signer and verifier agree on the exact bytes.

use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ProtocolResult;

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json_canonicalizer::to_vec(value)?)
}

/// Compute SHA-256 of bytes and return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical JSON form of a value.
pub fn canonical_sha256<T: Serialize>(value: &T) -> ProtocolResult<String> {
    Ok(sha256_hex(&to_canonical_vec(value)?))
}

pub fn b64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn b64_decode(encoded: &str) -> ProtocolResult<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
}
