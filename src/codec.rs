//! Status payloads and their encoding as statement predicates.

use std::marker::PhantomData;

use attest_protocol::canonical::to_canonical_vec;
use attest_protocol::{ProtocolError, Statement, Subject};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StatusError;

/// Namespace for status predicate types.
pub const PREDICATE_TYPE_NAMESPACE: &str = "https://status-attest.dev/status/v1";

/// Envelope size over status payload size, in tenths: base64 expansion plus
/// statement and envelope framing.
pub const ENVELOPE_OVERHEAD_TENTHS: usize = 17;

/// Predicate type for a reconciler identity.
pub fn predicate_type(identity: &str) -> String {
    format!("{}/{}", PREDICATE_TYPE_NAMESPACE, identity)
}

/// Largest status payload that fits in a log request of `log_request_limit` bytes.
pub fn payload_limit(log_request_limit: usize) -> usize {
    log_request_limit.saturating_mul(10) / ENVELOPE_OVERHEAD_TENTHS
}

/// Reconciliation status for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status<T> {
    /// Digest of the subject this status was written for.
    ///
    /// Overwritten on write, so any caller-supplied value is discarded.
    #[serde(default)]
    pub observed_generation: String,

    pub details: T,
}

impl<T> Status<T> {
    pub fn new(details: T) -> Self {
        Self {
            observed_generation: String::new(),
            details,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView<'a, T> {
    observed_generation: &'a str,
    details: &'a T,
}

/// Converts [`Status`] values to and from statements of one predicate type.
#[derive(Debug, Clone)]
pub struct StatusCodec<T> {
    predicate_type: String,
    payload_limit: usize,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> StatusCodec<T> {
    pub fn new(predicate_type: impl Into<String>, payload_limit: usize) -> Self {
        Self {
            predicate_type: predicate_type.into(),
            payload_limit,
            _payload: PhantomData,
        }
    }

    pub fn predicate_type(&self) -> &str {
        &self.predicate_type
    }

    pub fn payload_limit(&self) -> usize {
        self.payload_limit
    }

    /// Statement binding `status` to `subject`, generation set to the subject digest.
    ///
    /// Fails with [`StatusError::PayloadTooLarge`] when the canonical JSON of
    /// the details exceeds the payload limit.
    pub fn encode(&self, subject: &Subject, status: &Status<T>) -> Result<Statement, StatusError> {
        let size = to_canonical_vec(&status.details)
            .map_err(StatusError::Encode)?
            .len();
        if size > self.payload_limit {
            return Err(StatusError::PayloadTooLarge {
                size,
                limit: self.payload_limit,
            });
        }

        let generation = subject.digest.to_string();
        let predicate = serde_json::to_value(StatusView {
            observed_generation: &generation,
            details: &status.details,
        })
        .map_err(|e| StatusError::Encode(e.into()))?;

        Ok(Statement::new(subject, &self.predicate_type, predicate))
    }

    pub fn decode(&self, statement: &Statement) -> Result<Status<T>, ProtocolError> {
        Ok(serde_json::from_value(statement.predicate.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Details {
        phase: String,
        replicas: u32,
    }

    fn subject() -> Subject {
        format!("ghcr.io/acme/app@sha256:{}", "c".repeat(64))
            .parse()
            .unwrap()
    }

    #[test]
    fn test_predicate_type() {
        assert_eq!(
            predicate_type("deployer"),
            "https://status-attest.dev/status/v1/deployer"
        );
    }

    #[test]
    fn test_payload_limit() {
        assert_eq!(payload_limit(1700), 1000);
        assert_eq!(payload_limit(32 * 1024 * 1024), 19_737_901);
        assert_eq!(payload_limit(0), 0);
    }

    #[test]
    fn test_encode_overwrites_generation() {
        let codec = StatusCodec::<Details>::new(predicate_type("deployer"), 1024);
        let status = Status {
            observed_generation: "sha256:forged".to_string(),
            details: Details {
                phase: "ready".to_string(),
                replicas: 3,
            },
        };

        let statement = codec.encode(&subject(), &status).unwrap();
        assert_eq!(statement.predicate_type, predicate_type("deployer"));
        assert_eq!(
            statement.predicate,
            json!({
                "observedGeneration": format!("sha256:{}", "c".repeat(64)),
                "details": {"phase": "ready", "replicas": 3}
            })
        );
        assert!(statement.binds_digest(&subject()));

        let decoded = codec.decode(&statement).unwrap();
        assert_eq!(decoded.details, status.details);
        assert_eq!(decoded.observed_generation, subject().digest.to_string());
    }

    #[test]
    fn test_size_boundary() {
        let codec = StatusCodec::<String>::new(predicate_type("deployer"), 10);

        // canonical JSON of a string adds two quote bytes
        assert!(codec.encode(&subject(), &Status::new("a".repeat(8))).is_ok());
        assert!(matches!(
            codec.encode(&subject(), &Status::new("a".repeat(9))),
            Err(StatusError::PayloadTooLarge { size: 11, limit: 10 })
        ));
    }

    #[test]
    fn test_decode_rejects_foreign_predicate() {
        let codec = StatusCodec::<Details>::new(predicate_type("deployer"), 1024);
        let statement = Statement::new(&subject(), "other", json!({"unrelated": true}));
        assert!(codec.decode(&statement).is_err());
    }
}
