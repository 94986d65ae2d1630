//! Status Attestation Protocol Types
//!
//! Defines the signed objects exchanged between a status manager, the
//! certificate authority, the transparency log and the attestation store.

pub mod canonical;
pub mod certificate;
pub mod envelope;
pub mod error;
pub mod log_entry;
pub mod signed;
pub mod statement;
pub mod subject;

pub use certificate::{Certificate, CertificateChain, TrustAnchor, TrustedRoot};
pub use envelope::{Envelope, EnvelopeSignature, DSSE_PAYLOAD_TYPE};
pub use error::{ProtocolError, ProtocolResult};
pub use log_entry::{LogEntry, LogKey};
pub use signed::{SignedEnvelope, SignerIdentity, PREDICATE_TYPE_ANNOTATION};
pub use statement::{ResourceDescriptor, Statement, STATEMENT_TYPE};
pub use subject::{Digest, Repository, Subject};
