//! Transparency log capability.

use attest_protocol::{LogEntry, LogKey, ProtocolError, SignedEnvelope};
use thiserror::Error;

use crate::context::{CancelAware, Cancelled, Context};

/// Errors from the transparency log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log rejected entry: {0}")]
    Rejected(String),

    #[error("request of {size} bytes exceeds the log's {limit} byte limit")]
    RequestTooLarge { size: usize, limit: usize },

    #[error("transparency log unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl CancelAware for LogError {
    fn is_cancelled(&self) -> bool {
        matches!(self, LogError::Cancelled(_))
    }
}

/// Append-only log that records signed envelopes and vouches for when it saw them.
pub trait TransparencyLog: Send + Sync {
    /// Record the envelope's log body; returns the sealed entry.
    ///
    /// The envelope's own `log_entry` field is ignored.
    fn record(&self, ctx: &Context, envelope: &SignedEnvelope) -> Result<LogEntry, LogError>;

    /// Keys currently used to sign entry timestamps.
    fn public_keys(&self, ctx: &Context) -> Result<Vec<LogKey>, LogError>;
}
