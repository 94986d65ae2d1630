//! Per-subject status reads and writes.

use attest_protocol::certificate::key_fingerprint;
use attest_protocol::{Envelope, SignedEnvelope, Subject, PREDICATE_TYPE_ANNOTATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::Status;
use crate::context::{CancelAware, Context};
use crate::error::{Stage, StatusError};
use crate::manager::Manager;
use crate::policy::{VerificationPolicy, VerifiedEnvelope};
use crate::store::{Location, PublishMode};

struct Candidate<T> {
    status: Status<T>,
    integrated_time: i64,
    log_index: u64,
}

/// Status operations for one subject.
///
/// Holds nothing beyond the subject and a manager handle; create one per
/// unit of work. Concurrent writes for the same subject are not serialized.
pub struct Session<T> {
    manager: Manager<T>,
    subject: Subject,
}

impl<T: Serialize + DeserializeOwned> Session<T> {
    pub(crate) fn new(manager: Manager<T>, subject: Subject) -> Self {
        Self { manager, subject }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Where this subject's attestations live, after any repository override.
    pub fn location(&self) -> Location {
        let inner = &self.manager.inner;
        match &inner.repository_override {
            Some(repository) => inner
                .store
                .location(&self.subject.in_repository(repository.clone())),
            None => inner.store.location(&self.subject),
        }
    }

    /// Latest trusted status for the subject.
    ///
    /// `Ok(None)` when nothing is stored or nothing stored verifies.
    /// Errors are reserved for failing to reach the store or the log.
    pub fn observed_state(&self, ctx: &Context) -> Result<Option<Status<T>>, StatusError> {
        ctx.check()?;
        let inner = &self.manager.inner;
        let location = self.location();

        let envelopes = inner.store.fetch_all(ctx, &location).map_err(|source| {
            if source.is_cancelled() {
                StatusError::Cancelled
            } else {
                StatusError::Fetch {
                    location: location.to_string(),
                    source,
                }
            }
        })?;
        if envelopes.is_empty() {
            debug!(subject = %self.subject, location = %location, "no status attestations");
            return Ok(None);
        }

        ctx.check()?;
        let log_keys = inner.log.public_keys(ctx).map_err(|e| {
            if e.is_cancelled() {
                StatusError::Cancelled
            } else {
                StatusError::LogKeys(e)
            }
        })?;

        let policy = VerificationPolicy {
            trusted_root: inner.trusted_root.clone(),
            log_keys,
            identity: inner.expected_identity.clone(),
            subject: self.subject.clone(),
        };

        let verified: Vec<VerifiedEnvelope> = envelopes
            .iter()
            .filter_map(|signed| match policy.verify(signed) {
                Ok(verified) => Some(verified),
                Err(e) => {
                    warn!(
                        subject = %self.subject,
                        location = %location,
                        signer = ?signed.signer_identity().map(|id| id.to_string()),
                        error = %e,
                        "dropping unverifiable status attestation"
                    );
                    None
                }
            })
            .collect();
        if verified.is_empty() {
            warn!(
                subject = %self.subject,
                location = %location,
                fetched = envelopes.len(),
                "no trusted status attestation"
            );
            return Ok(None);
        }

        let codec = self.manager.codec();
        let predicate_type = codec.predicate_type();
        let latest = verified
            .into_iter()
            .filter(|v| {
                v.annotated_predicate_type.as_deref() == Some(predicate_type)
                    && v.statement.predicate_type == predicate_type
            })
            .filter_map(|v| match codec.decode(&v.statement) {
                Ok(status) => Some(Candidate {
                    status,
                    integrated_time: v.integrated_time,
                    log_index: v.log_index,
                }),
                Err(e) => {
                    warn!(
                        subject = %self.subject,
                        log_index = v.log_index,
                        error = %e,
                        "skipping undecodable status"
                    );
                    None
                }
            })
            .max_by_key(|c| (c.integrated_time, c.log_index));

        match &latest {
            Some(c) => debug!(
                subject = %self.subject,
                integrated_time = c.integrated_time,
                log_index = c.log_index,
                "observed status"
            ),
            None => debug!(
                subject = %self.subject,
                predicate_type,
                "no status for this predicate type"
            ),
        }
        Ok(latest.map(|c| c.status))
    }

    /// Sign, log and publish `status`, replacing this signer's previous one.
    ///
    /// The stored `observedGeneration` is always the subject digest. Oversized
    /// details fail before any external call. Failures after that carry the
    /// stage they happened in; a log entry already recorded stays recorded.
    pub fn set_actual_state(&self, ctx: &Context, status: &Status<T>) -> Result<(), StatusError> {
        let inner = &self.manager.inner;
        let signer = inner.signer.as_ref().ok_or_else(|| StatusError::ReadOnly {
            identity: inner.identity.clone(),
        })?;

        let statement = self.manager.codec().encode(&self.subject, status)?;
        let mut envelope = Envelope::for_statement(&statement).map_err(StatusError::Encode)?;
        let signing_input = envelope.signing_input().map_err(StatusError::Encode)?;

        ctx.check()?;
        let signature = signer
            .sign(ctx, &signing_input)
            .map_err(|e| Stage::Sign.wrap(e))?;
        let keyid = signature
            .certificate_chain
            .leaf()
            .and_then(|leaf| leaf.verifying_key().ok())
            .map(|key| key_fingerprint(&key))
            .unwrap_or_default();
        envelope.add_signature(keyid, &signature.bytes);

        let mut signed = SignedEnvelope::new(envelope, signature.certificate_chain)
            .with_annotation(PREDICATE_TYPE_ANNOTATION, &inner.predicate_type);

        ctx.check()?;
        let entry = inner
            .log
            .record(ctx, &signed)
            .map_err(|e| Stage::Log.wrap(e))?;
        debug!(
            subject = %self.subject,
            log_id = %entry.log_id,
            log_index = entry.log_index,
            "recorded status in transparency log"
        );
        let log_index = entry.log_index;
        signed.log_entry = Some(entry);

        ctx.check()?;
        let location = self.location();
        inner
            .store
            .publish(ctx, &location, signed, PublishMode::Replace)
            .map_err(|e| Stage::Publish.wrap(e))?;

        info!(
            subject = %self.subject,
            location = %location,
            log_index,
            "published status"
        );
        Ok(())
    }
}
