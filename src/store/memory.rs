//! In-process attestation store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use attest_protocol::SignedEnvelope;

use tracing::debug;

use super::{outdated_by, supersedes, AttestationStore, Location, PublishMode, StoreError};
use crate::context::Context;

/// Thread-safe map from location to envelopes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    locations: Mutex<HashMap<Location, Vec<SignedEnvelope>>>,
    fetches: AtomicUsize,
    publishes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fetch_all` calls served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of successful `publish` calls.
    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Envelopes at a location, without going through a context.
    pub fn envelopes(&self, location: &Location) -> Vec<SignedEnvelope> {
        self.locations
            .lock()
            .map(|locations| locations.get(location).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Replace everything at a location.
    pub fn put(&self, location: &Location, envelopes: Vec<SignedEnvelope>) {
        if let Ok(mut locations) = self.locations.lock() {
            locations.insert(location.clone(), envelopes);
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

impl AttestationStore for MemoryStore {
    fn fetch_all(
        &self,
        ctx: &Context,
        location: &Location,
    ) -> Result<Vec<SignedEnvelope>, StoreError> {
        ctx.check()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let locations = self.locations.lock().map_err(|_| Self::poisoned())?;
        Ok(locations.get(location).cloned().unwrap_or_default())
    }

    fn publish(
        &self,
        ctx: &Context,
        location: &Location,
        envelope: SignedEnvelope,
        mode: PublishMode,
    ) -> Result<(), StoreError> {
        ctx.check()?;
        let mut locations = self.locations.lock().map_err(|_| Self::poisoned())?;
        let entries = locations.entry(location.clone()).or_default();
        if mode == PublishMode::Replace {
            if entries.iter().any(|existing| outdated_by(&envelope, existing)) {
                debug!(location = %location, "keeping later envelope of the same series");
                self.publishes.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            entries.retain(|existing| !supersedes(&envelope, existing));
        }
        entries.push(envelope);
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
