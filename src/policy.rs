//! Verification policy for fetched envelopes.
//!
//! An envelope is trusted only if every check passes:
//! 1. It carries a log entry from a known log whose signed entry timestamp
//!    verifies and whose body hash matches the envelope
//! 2. Its certificate chain walks from the leaf to a trust anchor, each link
//!    valid at the log integration time
//! 3. A DSSE signature verifies under the leaf key
//! 4. The leaf identity equals the expected (subject, issuer)
//! 5. The statement binds the expected subject digest
//!
//! Keyless certificates expire minutes after issuance, so chain validity is
//! checked at the integration time vouched for by the log, not at "now".

use attest_protocol::certificate::decode_signature;
use attest_protocol::envelope::pae;
use attest_protocol::{
    Certificate, LogEntry, LogKey, ProtocolError, SignedEnvelope, SignerIdentity, Statement,
    Subject, TrustedRoot,
};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use thiserror::Error;

/// Longest chain (leaf included) the verifier will walk.
pub const MAX_CHAIN_LENGTH: usize = 5;

/// Why an envelope was not trusted.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("envelope has no certificate chain")]
    NoCertificate,

    #[error("leaf certificate is a CA certificate")]
    LeafIsCa,

    #[error("certificate {subject:?} does not chain to a trusted root: {reason}")]
    UntrustedChain { subject: String, reason: String },

    #[error("certificate {subject:?} not valid at {at}")]
    NotValidAt { subject: String, at: DateTime<Utc> },

    #[error("envelope was never recorded in a transparency log")]
    Unlogged,

    #[error("log entry from unknown log {0}")]
    UnknownLog(String),

    #[error("log entry timestamp signature does not verify")]
    BadLogPromise,

    #[error("log entry body hash does not match the envelope")]
    LogBodyMismatch,

    #[error("no envelope signature verifies under the leaf key")]
    BadSignature,

    #[error("signed by {actual}, expected {expected}")]
    IdentityMismatch {
        expected: SignerIdentity,
        actual: SignerIdentity,
    },

    #[error("statement does not bind subject {0}")]
    SubjectMismatch(String),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
}

/// An envelope that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedEnvelope {
    pub statement: Statement,

    /// Predicate type annotation on the stored envelope
    pub annotated_predicate_type: Option<String>,

    pub integrated_time: i64,

    pub log_index: u64,
}

/// Trust material and expectations for verifying one subject's envelopes.
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    pub trusted_root: TrustedRoot,
    pub log_keys: Vec<LogKey>,
    pub identity: SignerIdentity,
    pub subject: Subject,
}

impl VerificationPolicy {
    pub fn verify(&self, signed: &SignedEnvelope) -> Result<VerifiedEnvelope, VerificationError> {
        let entry = signed
            .log_entry
            .as_ref()
            .ok_or(VerificationError::Unlogged)?;
        self.verify_log_entry(signed, entry)?;
        let integrated_at = entry.integrated_at().ok_or(VerificationError::BadLogPromise)?;

        let leaf = self.verify_chain(signed, integrated_at)?;
        let leaf_key = leaf.verifying_key()?;
        Self::verify_signature(signed, &leaf_key)?;

        let actual = SignerIdentity::new(
            leaf.subject.clone(),
            leaf.oidc_issuer.clone().unwrap_or_default(),
        );
        if actual != self.identity {
            return Err(VerificationError::IdentityMismatch {
                expected: self.identity.clone(),
                actual,
            });
        }

        let statement = signed.envelope.statement()?;
        if !statement.binds_digest(&self.subject) {
            return Err(VerificationError::SubjectMismatch(
                self.subject.digest.to_string(),
            ));
        }

        Ok(VerifiedEnvelope {
            statement,
            annotated_predicate_type: signed.predicate_type().map(str::to_string),
            integrated_time: entry.integrated_time,
            log_index: entry.log_index,
        })
    }

    fn verify_log_entry(
        &self,
        signed: &SignedEnvelope,
        entry: &LogEntry,
    ) -> Result<(), VerificationError> {
        let log_key = self
            .log_keys
            .iter()
            .find(|key| key.log_id == entry.log_id)
            .ok_or_else(|| VerificationError::UnknownLog(entry.log_id.clone()))?
            .verifying_key()?;

        if !entry.verify_promise(&log_key) {
            return Err(VerificationError::BadLogPromise);
        }
        if entry.body_hash != signed.log_body_hash()? {
            return Err(VerificationError::LogBodyMismatch);
        }
        Ok(())
    }

    /// Walk leaf → anchor; returns the leaf.
    fn verify_chain<'a>(
        &self,
        signed: &'a SignedEnvelope,
        at: DateTime<Utc>,
    ) -> Result<&'a Certificate, VerificationError> {
        let chain = &signed.certificate_chain;
        let leaf = chain.leaf().ok_or(VerificationError::NoCertificate)?;
        if leaf.is_ca {
            return Err(VerificationError::LeafIsCa);
        }

        let untrusted = |cert: &Certificate, reason: &str| VerificationError::UntrustedChain {
            subject: cert.subject.clone(),
            reason: reason.to_string(),
        };

        let mut current: &Certificate = leaf;
        for depth in 0..MAX_CHAIN_LENGTH {
            if !current.is_valid_at(at) {
                return Err(VerificationError::NotValidAt {
                    subject: current.subject.clone(),
                    at,
                });
            }

            if let Some(anchor) = self.trusted_root.anchor_key(&current.authority_key_id) {
                return if current.is_issued_by(&anchor) {
                    Ok(leaf)
                } else {
                    Err(untrusted(current, "signature by trust anchor does not verify"))
                };
            }

            let issuer = chain
                .iter()
                .skip(depth + 1)
                .find(|cert| key_id_of(cert).as_deref() == Some(current.authority_key_id.as_str()))
                .or_else(|| self.trusted_root.intermediate(&current.authority_key_id))
                .ok_or_else(|| untrusted(current, "issuer not found"))?;

            if !issuer.is_ca {
                return Err(untrusted(current, "issuer is not a CA certificate"));
            }
            if !current.is_issued_by(&issuer.verifying_key()?) {
                return Err(untrusted(current, "issuer signature does not verify"));
            }
            current = issuer;
        }
        Err(untrusted(current, "chain too long"))
    }

    fn verify_signature(
        signed: &SignedEnvelope,
        leaf_key: &VerifyingKey,
    ) -> Result<(), VerificationError> {
        let payload = signed.envelope.payload_bytes()?;
        let message = pae(&signed.envelope.payload_type, &payload);
        let verified = signed.envelope.signatures.iter().any(|sig| {
            decode_signature(&sig.sig)
                .map(|signature| leaf_key.verify_strict(&message, &signature).is_ok())
                .unwrap_or(false)
        });
        if verified {
            Ok(())
        } else {
            Err(VerificationError::BadSignature)
        }
    }
}

fn key_id_of(cert: &Certificate) -> Option<String> {
    cert.verifying_key()
        .ok()
        .map(|key| attest_protocol::certificate::key_fingerprint(&key))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::Context;
    use crate::identity::{StaticTokenProvider, SIGNING_AUDIENCE};
    use crate::local::{LocalAuthority, LocalIssuer, LocalLog};
    use crate::signer::{CertificateAuthority, KeylessSigner, Signer};
    use crate::tlog::TransparencyLog;
    use attest_protocol::{Envelope, PREDICATE_TYPE_ANNOTATION};
    use serde_json::json;

    const ISSUER: &str = "https://issuer.test";

    fn subject(c: char) -> Subject {
        format!("ghcr.io/acme/app@sha256:{}", c.to_string().repeat(64))
            .parse()
            .unwrap()
    }

    fn authority() -> Arc<LocalAuthority> {
        Arc::new(
            LocalAuthority::generate("test", LocalIssuer::new(ISSUER, b"secret".to_vec())).unwrap(),
        )
    }

    fn signed_envelope(authority: &Arc<LocalAuthority>, log: &LocalLog) -> SignedEnvelope {
        let ctx = Context::background();
        let raw = authority
            .issuer()
            .mint("reconciler", SIGNING_AUDIENCE, chrono::Duration::minutes(5))
            .unwrap();
        let signer = KeylessSigner::new(
            &ctx,
            authority.clone(),
            Arc::new(StaticTokenProvider::new(&raw).unwrap()),
        )
        .unwrap();

        let statement = Statement::new(&subject('a'), "p/status", json!({"observedGeneration": "g"}));
        let mut envelope = Envelope::for_statement(&statement).unwrap();
        let signature = signer.sign(&ctx, &envelope.signing_input().unwrap()).unwrap();
        envelope.add_signature(String::new(), &signature.bytes);

        let mut signed = SignedEnvelope::new(envelope, signature.certificate_chain)
            .with_annotation(PREDICATE_TYPE_ANNOTATION, "p/status");
        signed.log_entry = Some(log.record(&ctx, &signed).unwrap());
        signed
    }

    fn policy(authority: &LocalAuthority, log: &LocalLog) -> VerificationPolicy {
        let ctx = Context::background();
        VerificationPolicy {
            trusted_root: authority.trusted_root(&ctx).unwrap(),
            log_keys: log.public_keys(&ctx).unwrap(),
            identity: SignerIdentity::new("reconciler", ISSUER),
            subject: subject('a'),
        }
    }

    #[test]
    fn test_valid_envelope() {
        let authority = authority();
        let log = LocalLog::new();
        let signed = signed_envelope(&authority, &log);

        let verified = policy(&authority, &log).verify(&signed).unwrap();
        assert_eq!(verified.statement.predicate_type, "p/status");
        assert_eq!(verified.annotated_predicate_type.as_deref(), Some("p/status"));
        assert_eq!(verified.log_index, 0);
    }

    #[test]
    fn test_unlogged_envelope() {
        let authority = authority();
        let log = LocalLog::new();
        let mut signed = signed_envelope(&authority, &log);
        signed.log_entry = None;

        assert!(matches!(
            policy(&authority, &log).verify(&signed),
            Err(VerificationError::Unlogged)
        ));
    }

    #[test]
    fn test_unknown_log() {
        let authority = authority();
        let log = LocalLog::new();
        let signed = signed_envelope(&authority, &log);

        let other_log = LocalLog::new();
        assert!(matches!(
            policy(&authority, &other_log).verify(&signed),
            Err(VerificationError::UnknownLog(_))
        ));
    }

    #[test]
    fn test_tampered_payload() {
        let authority = authority();
        let log = LocalLog::new();
        let mut signed = signed_envelope(&authority, &log);
        let forged = Statement::new(&subject('a'), "p/status", json!({"observedGeneration": "forged"}));
        signed.envelope.payload = Envelope::for_statement(&forged).unwrap().payload;

        assert!(matches!(
            policy(&authority, &log).verify(&signed),
            Err(VerificationError::LogBodyMismatch)
        ));
    }

    #[test]
    fn test_untrusted_authority() {
        let authority = authority();
        let log = LocalLog::new();
        let signed = signed_envelope(&authority, &log);

        let stranger = LocalAuthority::generate("stranger", LocalIssuer::new(ISSUER, b"x".to_vec())).unwrap();
        let mut policy = policy(&authority, &log);
        policy.trusted_root = stranger.trusted_root(&Context::background()).unwrap();

        assert!(matches!(
            policy.verify(&signed),
            Err(VerificationError::UntrustedChain { .. })
        ));
    }

    #[test]
    fn test_identity_mismatch() {
        let authority = authority();
        let log = LocalLog::new();
        let signed = signed_envelope(&authority, &log);
        let mut policy = policy(&authority, &log);
        policy.identity = SignerIdentity::new("someone-else", ISSUER);

        assert!(matches!(
            policy.verify(&signed),
            Err(VerificationError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn test_subject_mismatch() {
        let authority = authority();
        let log = LocalLog::new();
        let signed = signed_envelope(&authority, &log);
        let mut policy = policy(&authority, &log);
        policy.subject = subject('b');

        assert!(matches!(
            policy.verify(&signed),
            Err(VerificationError::SubjectMismatch(_))
        ));
    }

    #[test]
    fn test_logged_after_certificate_expiry() {
        let authority = authority();
        let late = chrono::Utc::now().timestamp() + 24 * 3600;
        let log = LocalLog::new().with_clock(move || late);
        let signed = signed_envelope(&authority, &log);

        assert!(matches!(
            policy(&authority, &log).verify(&signed),
            Err(VerificationError::NotValidAt { .. })
        ));
    }

    #[test]
    fn test_leaf_without_intermediate_uses_trusted_intermediates() {
        let authority = authority();
        let log = LocalLog::new();
        let mut signed = signed_envelope(&authority, &log);
        let intermediate = signed.certificate_chain.0.pop().unwrap();
        signed.log_entry = Some(log.record(&Context::background(), &signed).unwrap());

        let mut policy = policy(&authority, &log);
        assert!(matches!(
            policy.verify(&signed),
            Err(VerificationError::UntrustedChain { .. })
        ));

        policy.trusted_root.intermediates.push(intermediate);
        assert!(policy.verify(&signed).is_ok());
    }
}
