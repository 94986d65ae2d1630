//! Transparency log entries.
//!
//! A log entry is a promise from the log: it commits to the hash of the
//! recorded body, the position in the log, and the integration time, and the
//! log signs those fields (the signed entry timestamp).

use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::canonical::{b64_encode, to_canonical_vec};
use crate::certificate::{decode_signature, decode_verifying_key, encode_verifying_key, key_fingerprint};
use crate::error::ProtocolResult;

/// Public key of a transparency log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogKey {
    /// Fingerprint of the log's public key
    pub log_id: String,

    /// Base64-encoded Ed25519 public key
    pub public_key: String,
}

impl LogKey {
    pub fn from_key(key: &VerifyingKey) -> Self {
        Self {
            log_id: key_fingerprint(key),
            public_key: encode_verifying_key(key),
        }
    }

    pub fn verifying_key(&self) -> ProtocolResult<VerifyingKey> {
        decode_verifying_key(&self.public_key)
    }
}

/// Entry returned by the log after recording a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub uuid: String,

    pub log_id: String,

    pub log_index: u64,

    /// Unix seconds at which the log integrated the entry
    pub integrated_time: i64,

    /// SHA-256 (hex) of the canonical recorded body
    pub body_hash: String,

    /// Base64 signature by the log over the promise fields
    #[serde(default)]
    pub signed_entry_timestamp: String,
}

#[derive(Serialize)]
struct Promise<'a> {
    body_hash: &'a str,
    integrated_time: i64,
    log_id: &'a str,
    log_index: u64,
}

impl LogEntry {
    fn promise_bytes(&self) -> ProtocolResult<Vec<u8>> {
        to_canonical_vec(&Promise {
            body_hash: &self.body_hash,
            integrated_time: self.integrated_time,
            log_id: &self.log_id,
            log_index: self.log_index,
        })
    }

    /// Sign the promise with the log key.
    pub fn seal(mut self, log_key: &SigningKey) -> ProtocolResult<Self> {
        self.log_id = key_fingerprint(&log_key.verifying_key());
        let promise = self.promise_bytes()?;
        self.signed_entry_timestamp = b64_encode(&log_key.sign(&promise).to_bytes());
        Ok(self)
    }

    /// Whether the signed entry timestamp was produced by `log_key`.
    pub fn verify_promise(&self, log_key: &VerifyingKey) -> bool {
        let (Ok(promise), Ok(signature)) = (
            self.promise_bytes(),
            decode_signature(&self.signed_entry_timestamp),
        ) else {
            return false;
        };
        log_key.verify_strict(&promise, &signature).is_ok()
    }

    pub fn integrated_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.integrated_time, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LogEntry {
        LogEntry {
            uuid: "u-1".to_string(),
            log_id: String::new(),
            log_index: 7,
            integrated_time: 1_700_000_000,
            body_hash: "ab".repeat(32),
            signed_entry_timestamp: String::new(),
        }
    }

    #[test]
    fn test_seal_and_verify() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let sealed = entry().seal(&key).unwrap();

        assert_eq!(sealed.log_id, LogKey::from_key(&key.verifying_key()).log_id);
        assert!(sealed.verify_promise(&key.verifying_key()));
    }

    #[test]
    fn test_backdated_entry_fails() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let mut sealed = entry().seal(&key).unwrap();
        sealed.integrated_time += 3600;

        assert!(!sealed.verify_promise(&key.verifying_key()));
    }

    #[test]
    fn test_integrated_at() {
        let at = entry().integrated_at().unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
    }
}
