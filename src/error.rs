//! Manager construction and session errors.

use std::error::Error as StdError;
use std::fmt;

use attest_protocol::ProtocolError;
use thiserror::Error;

use crate::context::{CancelAware, Cancelled};
use crate::identity::IdentityError;
use crate::signer::SignError;
use crate::store::StoreError;
use crate::tlog::LogError;

/// Fatal errors building a [`Manager`](crate::Manager). Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("identity must not be empty")]
    EmptyIdentity,

    #[error("read-only manager requires an expected signer identity")]
    MissingExpectedIdentity,

    #[error("invalid repository override {value:?}: {source}")]
    InvalidRepositoryOverride {
        value: String,
        #[source]
        source: ProtocolError,
    },

    #[error("unsupported {option} {url:?}: only file:// endpoints can be connected")]
    UnsupportedEndpoint { option: &'static str, url: String },

    #[error("no {0} configured")]
    MissingEndpoint(&'static str),

    #[error("identity provider: {0}")]
    Identity(#[source] IdentityError),

    #[error("certificate authority: {0}")]
    Authority(#[source] SignError),

    #[error("transparency log: {0}")]
    Log(#[source] LogError),

    #[error("attestation store: {0}")]
    Store(#[source] StoreError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for ConfigError {
    fn from(_: Cancelled) -> Self {
        ConfigError::Cancelled
    }
}

macro_rules! config_error_from {
    ($source:ty, $variant:ident) => {
        impl From<$source> for ConfigError {
            fn from(err: $source) -> Self {
                if err.is_cancelled() {
                    ConfigError::Cancelled
                } else {
                    ConfigError::$variant(err)
                }
            }
        }
    };
}

config_error_from!(IdentityError, Identity);
config_error_from!(LogError, Log);
config_error_from!(StoreError, Store);

impl From<SignError> for ConfigError {
    fn from(err: SignError) -> Self {
        match err {
            SignError::Identity(err) => err.into(),
            err if err.is_cancelled() => ConfigError::Cancelled,
            err => ConfigError::Authority(err),
        }
    }
}
/// Step of a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Sign,
    Log,
    Publish,
}

impl Stage {
    /// Label a capability failure with this stage.
    pub fn wrap<E>(self, err: E) -> StatusError
    where
        E: StdError + CancelAware + Send + Sync + 'static,
    {
        if err.is_cancelled() {
            StatusError::Cancelled
        } else {
            StatusError::Stage {
                stage: self,
                source: Box::new(err),
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Sign => write!(f, "sign"),
            Stage::Log => write!(f, "log"),
            Stage::Publish => write!(f, "publish"),
        }
    }
}

/// Errors from session reads and writes.
///
/// An untrusted or missing status is not an error: reads return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("manager for {identity:?} is read-only")]
    ReadOnly { identity: String },

    #[error("status payload is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("encoding status: {0}")]
    Encode(#[source] ProtocolError),

    #[error("fetching attestations at {location}: {source}")]
    Fetch {
        location: String,
        #[source]
        source: StoreError,
    },

    #[error("fetching log public keys: {0}")]
    LogKeys(#[source] LogError),

    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for StatusError {
    fn from(_: Cancelled) -> Self {
        StatusError::Cancelled
    }
}

impl StatusError {
    /// Stage a write failed at, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StatusError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrap_labels_error() {
        let err = Stage::Log.wrap(LogError::Unavailable("down".to_string()));
        assert_eq!(err.stage(), Some(Stage::Log));
        assert!(err.to_string().starts_with("log: "));
    }

    #[test]
    fn test_stage_wrap_maps_cancellation() {
        let err = Stage::Sign.wrap(SignError::Cancelled(Cancelled));
        assert!(matches!(err, StatusError::Cancelled));
    }

    #[test]
    fn test_config_error_maps_cancellation() {
        let err: ConfigError = StoreError::Cancelled(Cancelled).into();
        assert!(matches!(err, ConfigError::Cancelled));

        let err: ConfigError = StoreError::Unavailable("gone".to_string()).into();
        assert!(matches!(err, ConfigError::Store(_)));
    }
}
