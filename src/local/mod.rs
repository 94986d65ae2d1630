//! Local trust domain: file-backed implementations of every capability.
//!
//! A domain directory holds three components, each addressable on its own
//! with a `file://` URL:
//!
//! ```text
//! <root>/authority/   certificate authority + token issuer
//! <root>/log/         transparency log
//! <root>/registry/    attestation store
//! ```

mod authority;
mod issuer;
mod log;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::signer::SignError;
use crate::store::{FileStore, StoreError};
use crate::tlog::LogError;

pub use authority::{LocalAuthority, AUTHORITY_FILE, DEFAULT_CERTIFICATE_TTL_SECONDS};
pub use issuer::{LocalIssuer, DEFAULT_TOKEN_TTL_SECONDS};
pub use log::{LocalLog, DEFAULT_LOG_REQUEST_LIMIT, LOG_ENTRIES_FILE, LOG_KEY_FILE};

pub const AUTHORITY_DIR: &str = "authority";
pub const LOG_DIR: &str = "log";
pub const REGISTRY_DIR: &str = "registry";

/// URL scheme accepted for local endpoints.
pub const FILE_SCHEME: &str = "file://";

/// Errors creating or opening a local domain.
#[derive(Debug, Error)]
pub enum LocalDomainError {
    #[error("authority: {0}")]
    Authority(#[from] SignError),

    #[error("log: {0}")]
    Log(#[from] LogError),

    #[error("registry: {0}")]
    Store(#[from] StoreError),
}

/// Path named by a `file://` URL, if it is one.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix(FILE_SCHEME)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// `file://` URL for a path.
pub fn file_url(path: &Path) -> String {
    format!("{}{}", FILE_SCHEME, path.display())
}

/// A local trust domain rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalDomain {
    root: PathBuf,
}

impl LocalDomain {
    /// Create (or complete) a domain, generating any missing keys.
    pub fn init(root: impl AsRef<Path>) -> Result<Self, LocalDomainError> {
        let domain = Self::at(root);
        domain.authority()?;
        domain.log()?;
        domain.store()?;
        Ok(domain)
    }

    /// Refer to a domain without touching the filesystem.
    pub fn at(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ca_url(&self) -> String {
        file_url(&self.root.join(AUTHORITY_DIR))
    }

    pub fn log_url(&self) -> String {
        file_url(&self.root.join(LOG_DIR))
    }

    pub fn registry_url(&self) -> String {
        file_url(&self.root.join(REGISTRY_DIR))
    }

    pub fn authority(&self) -> Result<LocalAuthority, SignError> {
        LocalAuthority::open(&self.root.join(AUTHORITY_DIR))
    }

    pub fn log(&self) -> Result<LocalLog, LogError> {
        LocalLog::open(&self.root.join(LOG_DIR))
    }

    pub fn store(&self) -> Result<FileStore, StoreError> {
        FileStore::open(self.root.join(REGISTRY_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_url_path() {
        assert_eq!(file_url_path("file:///tmp/x"), Some(PathBuf::from("/tmp/x")));
        assert_eq!(file_url_path("file://"), None);
        assert_eq!(file_url_path("https://ca.example"), None);
    }

    #[test]
    fn test_init_creates_components() {
        let dir = TempDir::new().unwrap();
        let domain = LocalDomain::init(dir.path()).unwrap();

        assert!(dir.path().join(AUTHORITY_DIR).join(AUTHORITY_FILE).exists());
        assert!(dir.path().join(LOG_DIR).join(LOG_KEY_FILE).exists());
        assert!(dir.path().join(REGISTRY_DIR).is_dir());
        assert_eq!(
            file_url_path(&domain.log_url()),
            Some(dir.path().join(LOG_DIR))
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = LocalDomain::init(dir.path()).unwrap().authority().unwrap();
        let second = LocalDomain::init(dir.path()).unwrap().authority().unwrap();
        assert_eq!(first.root_key(), second.root_key());
    }
}
