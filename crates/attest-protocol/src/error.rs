//! Error types for protocol objects.

use thiserror::Error;

/// Errors from parsing, encoding or checking protocol objects.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid digest {0:?}: expected sha256:<64 lowercase hex>")]
    InvalidDigest(String),

    #[error("invalid repository {0:?}")]
    InvalidRepository(String),

    #[error("invalid subject reference {0:?}: expected <repository>@sha256:<hex>")]
    InvalidSubject(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("unexpected payload type {actual:?}, expected {expected:?}")]
    PayloadType { expected: String, actual: String },

    #[error("unexpected statement type {0:?}")]
    StatementType(String),

    #[error("envelope carries no signatures")]
    Unsigned,
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
