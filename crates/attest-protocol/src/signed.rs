//! Signed envelopes as held by an attestation store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_sha256;
use crate::certificate::{Certificate, CertificateChain};
use crate::envelope::Envelope;
use crate::error::ProtocolResult;
use crate::log_entry::LogEntry;

/// Annotation key carrying the statement's predicate type.
pub const PREDICATE_TYPE_ANNOTATION: &str = "predicateType";

/// Who signed an envelope: certificate subject and the OIDC issuer that vouched for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerIdentity {
    pub subject: String,
    pub issuer: String,
}

impl SignerIdentity {
    pub fn new(subject: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            issuer: issuer.into(),
        }
    }
}

impl fmt::Display for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject, self.issuer)
    }
}

/// Body recorded in the transparency log for an envelope.
#[derive(Serialize)]
struct LogBody<'a> {
    envelope: &'a Envelope,
    certificate: Option<&'a Certificate>,
}

/// DSSE envelope with the material needed to verify it offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub envelope: Envelope,

    pub certificate_chain: CertificateChain,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_entry: Option<LogEntry>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl SignedEnvelope {
    pub fn new(envelope: Envelope, certificate_chain: CertificateChain) -> Self {
        Self {
            envelope,
            certificate_chain,
            log_entry: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn predicate_type(&self) -> Option<&str> {
        self.annotations
            .get(PREDICATE_TYPE_ANNOTATION)
            .map(String::as_str)
    }

    /// Identity claimed by the leaf certificate. Unverified.
    pub fn signer_identity(&self) -> Option<SignerIdentity> {
        let leaf = self.certificate_chain.leaf()?;
        Some(SignerIdentity::new(
            leaf.subject.clone(),
            leaf.oidc_issuer.clone()?,
        ))
    }

    /// Hash of the body a transparency log records for this envelope.
    ///
    /// Covers the envelope and leaf certificate, not the log entry itself.
    pub fn log_body_hash(&self) -> ProtocolResult<String> {
        canonical_sha256(&LogBody {
            envelope: &self.envelope,
            certificate: self.certificate_chain.leaf(),
        })
    }

    /// Content hash used to name the envelope in a store.
    pub fn content_hash(&self) -> ProtocolResult<String> {
        canonical_sha256(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
