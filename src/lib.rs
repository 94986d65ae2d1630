//! status-attest - reconciliation status as signed attestations
//!
//! Controllers record "which generation of this artifact have I observed"
//! as in-toto statements signed with short-lived, identity-bound
//! certificates, recorded in a transparency log and stored next to the
//! artifact. Reads verify the whole chain and return the latest status
//! signed by the expected identity, or nothing.

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod local;
pub mod manager;
pub mod policy;
pub mod session;
pub mod signal;
pub mod signer;
pub mod store;
pub mod tlog;

pub use attest_protocol::{SignerIdentity, Subject};
pub use codec::{Status, StatusCodec};
pub use context::Context;
pub use error::{ConfigError, Stage, StatusError};
pub use manager::{Manager, Options};
pub use session::Session;
