//! Attestation store capability.
//!
//! A store maps a subject to a deterministic location and holds any number
//! of signed envelopes there. Publishing in [`PublishMode::Replace`] removes
//! the envelopes the new one supersedes: those by the same signer identity
//! with the same predicate type whose log entry is not later than the new
//! one's. A replace publish that arrives after a later entry of its series is
//! dropped instead. Envelopes by other signers, or for other predicate types,
//! are never touched.

mod file;
mod memory;

use std::fmt;

use attest_protocol::{ProtocolError, Repository, SignedEnvelope, Subject};
use thiserror::Error;

use crate::context::{CancelAware, Cancelled, Context};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors from the attestation store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl CancelAware for StoreError {
    fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled(_))
    }
}

/// Where attestations for a subject live: a repository and a digest-derived tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub repository: Repository,
    pub tag: String,
}

impl Location {
    /// `<repository>:sha256-<hex>.att`
    pub fn for_subject(subject: &Subject) -> Self {
        Self {
            repository: subject.repository.clone(),
            tag: format!("{}-{}.att", subject.digest.algorithm(), subject.digest.hex()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// How a publish treats envelopes already at the location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Drop superseded envelopes and add the new one, unless the location
    /// already holds a later envelope of the same series
    Replace,
    /// Add alongside everything already present
    Append,
}

/// Position of an envelope in transparency log order.
///
/// Unlogged envelopes sort before every logged one.
pub fn log_order(envelope: &SignedEnvelope) -> Option<(i64, u64)> {
    envelope
        .log_entry
        .as_ref()
        .map(|entry| (entry.integrated_time, entry.log_index))
}

/// Same claimed signer identity and same predicate type annotation.
///
/// Envelopes with no identity or no predicate type never share a series.
fn same_series(a: &SignedEnvelope, b: &SignedEnvelope) -> bool {
    let (Some(a_identity), Some(b_identity)) = (a.signer_identity(), b.signer_identity()) else {
        return false;
    };
    a_identity == b_identity
        && a.predicate_type().is_some()
        && a.predicate_type() == b.predicate_type()
}

/// Whether `new` supersedes `existing` under replace semantics.
///
/// `existing` must be in the same series and not later than `new` in log
/// order.
pub fn supersedes(new: &SignedEnvelope, existing: &SignedEnvelope) -> bool {
    same_series(new, existing) && log_order(existing) <= log_order(new)
}

/// Whether `existing` is later in log order than `new` in the same series.
///
/// A replace publish of `new` then keeps `existing` and drops `new`.
pub fn outdated_by(new: &SignedEnvelope, existing: &SignedEnvelope) -> bool {
    same_series(new, existing) && log_order(existing) > log_order(new)
}

/// Maps subjects to locations and stores signed envelopes there.
pub trait AttestationStore: Send + Sync {
    fn location(&self, subject: &Subject) -> Location {
        Location::for_subject(subject)
    }

    /// All envelopes at the location. An empty location is `Ok(vec![])`.
    fn fetch_all(&self, ctx: &Context, location: &Location)
        -> Result<Vec<SignedEnvelope>, StoreError>;

    fn publish(
        &self,
        ctx: &Context,
        location: &Location,
        envelope: SignedEnvelope,
        mode: PublishMode,
    ) -> Result<(), StoreError>;
}


#[cfg(test)]
mod tests {
    use super::test_support::{claimed, logged};
    use super::*;

    #[test]
    fn test_location_for_subject() {
        let subject: Subject = format!("ghcr.io/acme/app@sha256:{}", "e".repeat(64))
            .parse()
            .unwrap();
        let location = Location::for_subject(&subject);
        assert_eq!(location.repository.as_str(), "ghcr.io/acme/app");
        assert_eq!(location.tag, format!("sha256-{}.att", "e".repeat(64)));
        assert_eq!(
            location.to_string(),
            format!("ghcr.io/acme/app:sha256-{}.att", "e".repeat(64))
        );
    }

    #[test]
    fn test_supersedes_same_identity_and_predicate() {
        let old = claimed("a@test", "iss", "p/one", "old");
        let new = claimed("a@test", "iss", "p/one", "new");
        assert!(supersedes(&new, &old));
    }

    #[test]
    fn test_does_not_supersede_other_identity_or_predicate() {
        let new = claimed("a@test", "iss", "p/one", "new");
        assert!(!supersedes(&new, &claimed("b@test", "iss", "p/one", "x")));
        assert!(!supersedes(&new, &claimed("a@test", "other-iss", "p/one", "x")));
        assert!(!supersedes(&new, &claimed("a@test", "iss", "p/two", "x")));
    }

    #[test]
    fn test_later_entry_is_not_superseded() {
        let earlier = logged("a", "earlier", 100, 0);
        let later = logged("a", "later", 105, 1);

        assert!(supersedes(&later, &earlier));
        assert!(!supersedes(&earlier, &later));
        assert!(outdated_by(&earlier, &later));
        assert!(!outdated_by(&later, &earlier));
    }

    #[test]
    fn test_log_index_breaks_time_ties() {
        let first = logged("a", "first", 100, 3);
        let second = logged("a", "second", 100, 4);

        assert!(supersedes(&second, &first));
        assert!(outdated_by(&first, &second));
    }

    #[test]
    fn test_other_series_never_outdates() {
        let mine = logged("a", "mine", 100, 0);
        let theirs = logged("b", "theirs", 200, 1);
        assert!(!outdated_by(&mine, &theirs));
        assert!(!supersedes(&mine, &theirs));
    }
}
