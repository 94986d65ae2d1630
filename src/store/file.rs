//! Directory-backed attestation store.
//!
//! Layout: `<root>/<repository>/<tag>/<sha256 of envelope>.json`.
//!
//! Writes go to a temp file in the location directory and are renamed into
//! place, so readers never observe a partial envelope. Superseded envelopes
//! are removed only after the new one is in place. A replace writer that
//! finds a later envelope of its own series removes its own file instead, so
//! concurrent writers always leave the latest one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use attest_protocol::SignedEnvelope;
use tracing::{debug, warn};

use super::{outdated_by, supersedes, AttestationStore, Location, PublishMode, StoreError};
use crate::context::Context;

const ENVELOPE_EXTENSION: &str = "json";

/// Escape for the registry port separator. `%` is outside the repository
/// grammar, so distinct repositories never share a directory.
const PORT_SEPARATOR_ESCAPE: &str = "%3A";

/// Attestation store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store, creating the root directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a location's envelopes.
    ///
    /// Repository names are validated by the grammar in `attest_protocol`, so
    /// they contain no `..` segments; `:` (registry port) is escaped to keep
    /// paths portable.
    pub fn location_dir(&self, location: &Location) -> PathBuf {
        let mut dir = self.root.clone();
        for segment in location.repository.as_str().split('/') {
            dir.push(segment.replace(':', PORT_SEPARATOR_ESCAPE));
        }
        dir.push(&location.tag);
        dir
    }

    fn read_dir_envelopes(dir: &Path) -> Result<Vec<(PathBuf, SignedEnvelope)>, StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut envelopes = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENVELOPE_EXTENSION) {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            match SignedEnvelope::from_json(&contents) {
                Ok(envelope) => envelopes.push((path, envelope)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable envelope");
                }
            }
        }
        // Directory order is unspecified; keep results stable.
        envelopes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(envelopes)
    }
}

impl AttestationStore for FileStore {
    fn fetch_all(
        &self,
        ctx: &Context,
        location: &Location,
    ) -> Result<Vec<SignedEnvelope>, StoreError> {
        ctx.check()?;
        let envelopes = Self::read_dir_envelopes(&self.location_dir(location))?;
        Ok(envelopes.into_iter().map(|(_, envelope)| envelope).collect())
    }

    fn publish(
        &self,
        ctx: &Context,
        location: &Location,
        envelope: SignedEnvelope,
        mode: PublishMode,
    ) -> Result<(), StoreError> {
        ctx.check()?;
        let dir = self.location_dir(location);
        fs::create_dir_all(&dir)?;

        let name = format!("{}.{}", envelope.content_hash()?, ENVELOPE_EXTENSION);
        let final_path = dir.join(&name);
        let temp_path = dir.join(format!(".{}.tmp", name));

        fs::write(&temp_path, envelope.to_json()?)?;
        fs::rename(&temp_path, &final_path)?;

        if mode == PublishMode::Replace {
            let others: Vec<_> = Self::read_dir_envelopes(&dir)?
                .into_iter()
                .filter(|(path, _)| *path != final_path)
                .collect();
            if others.iter().any(|(_, existing)| outdated_by(&envelope, existing)) {
                debug!(path = %final_path.display(), "keeping later envelope of the same series");
                return remove_if_present(&final_path);
            }
            for (path, existing) in others {
                if supersedes(&envelope, &existing) {
                    debug!(path = %path.display(), "removing superseded envelope");
                    remove_if_present(&path)?;
                }
            }
        }
        Ok(())
    }
}

/// A concurrent writer may already have removed the file.
fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{claimed, logged};
    use attest_protocol::Subject;
    use tempfile::TempDir;

    fn location(repository: &str) -> Location {
        let subject: Subject = format!("{}@sha256:{}", repository, "2".repeat(64))
            .parse()
            .unwrap();
        Location::for_subject(&subject)
    }

    #[test]
    fn test_missing_location_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let fetched = store
            .fetch_all(&Context::background(), &location("ghcr.io/acme/app"))
            .unwrap();
        assert!(fetched.is_empty());
    }

    #[test]
    fn test_publish_and_fetch() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let ctx = Context::background();
        let loc = location("localhost:5000/acme/app");

        let envelope = claimed("a", "i", "p", "a1");
        store
            .publish(&ctx, &loc, envelope.clone(), PublishMode::Replace)
            .unwrap();

        assert!(store.location_dir(&loc).starts_with(dir.path().join("localhost%3A5000")));
        assert_eq!(store.fetch_all(&ctx, &loc).unwrap(), vec![envelope]);
    }

    #[test]
    fn test_replace_removes_superseded_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let ctx = Context::background();
        let loc = location("ghcr.io/acme/app");

        store
            .publish(&ctx, &loc, claimed("a", "i", "p", "a1"), PublishMode::Replace)
            .unwrap();
        store
            .publish(&ctx, &loc, claimed("b", "i", "p", "b1"), PublishMode::Replace)
            .unwrap();
        store
            .publish(&ctx, &loc, claimed("a", "i", "p", "a2"), PublishMode::Replace)
            .unwrap();

        let mut payloads: Vec<_> = store
            .fetch_all(&ctx, &loc)
            .unwrap()
            .into_iter()
            .map(|e| e.envelope.payload)
            .collect();
        payloads.sort();
        assert_eq!(payloads, vec!["a2".to_string(), "b1".to_string()]);
    }

    #[test]
    fn test_port_and_underscore_repositories_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let ctx = Context::background();
        let with_port = location("localhost:5000/acme/app");
        let with_underscore = location("localhost_5000/acme/app");

        assert_ne!(store.location_dir(&with_port), store.location_dir(&with_underscore));

        store
            .publish(&ctx, &with_port, claimed("a", "i", "p", "a1"), PublishMode::Replace)
            .unwrap();
        assert!(store.fetch_all(&ctx, &with_underscore).unwrap().is_empty());
        assert_eq!(store.fetch_all(&ctx, &with_port).unwrap().len(), 1);
    }

    #[test]
    fn test_late_replace_keeps_later_entry() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let ctx = Context::background();
        let loc = location("ghcr.io/acme/app");

        store
            .publish(&ctx, &loc, logged("a", "later", 105, 1), PublishMode::Replace)
            .unwrap();
        store
            .publish(&ctx, &loc, logged("a", "earlier", 100, 0), PublishMode::Replace)
            .unwrap();

        let fetched = store.fetch_all(&ctx, &loc).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].envelope.payload, "later");
    }

    #[test]
    fn test_republish_same_envelope_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let ctx = Context::background();
        let loc = location("ghcr.io/acme/app");
        let envelope = claimed("a", "i", "p", "a1");

        store
            .publish(&ctx, &loc, envelope.clone(), PublishMode::Replace)
            .unwrap();
        store
            .publish(&ctx, &loc, envelope, PublishMode::Replace)
            .unwrap();

        assert_eq!(store.fetch_all(&ctx, &loc).unwrap().len(), 1);
    }

    #[test]
    fn test_unreadable_envelope_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let ctx = Context::background();
        let loc = location("ghcr.io/acme/app");

        store
            .publish(&ctx, &loc, claimed("a", "i", "p", "a1"), PublishMode::Append)
            .unwrap();
        fs::write(store.location_dir(&loc).join("garbage.json"), "{not json").unwrap();

        assert_eq!(store.fetch_all(&ctx, &loc).unwrap().len(), 1);
    }
}
