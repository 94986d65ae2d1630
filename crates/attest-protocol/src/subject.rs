//! Content-addressed subjects.
//!
//! A subject is a repository plus an immutable `sha256` digest. Subjects are
//! never mutated: a new digest is a new subject.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Only digest algorithm accepted for subjects.
pub const SHA256: &str = "sha256";

const REPOSITORY_PATTERN: &str = r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?/)?[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$";

const DIGEST_HEX_PATTERN: &str = r"^[a-f0-9]{64}$";

fn repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REPOSITORY_PATTERN).expect("repository pattern compiles"))
}

fn digest_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DIGEST_HEX_PATTERN).expect("digest pattern compiles"))
}

/// A `sha256:<hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Build a digest from its hex part.
    pub fn from_hex(hex: &str) -> ProtocolResult<Self> {
        if !digest_regex().is_match(hex) {
            return Err(ProtocolError::InvalidDigest(hex.to_string()));
        }
        Ok(Self {
            hex: hex.to_string(),
        })
    }

    /// Digest of the given bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            hex: crate::canonical::sha256_hex(bytes),
        }
    }

    pub fn algorithm(&self) -> &'static str {
        SHA256
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", SHA256, self.hex)
    }
}

impl FromStr for Digest {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((SHA256, hex)) => {
                Self::from_hex(hex).map_err(|_| ProtocolError::InvalidDigest(s.to_string()))
            }
            _ => Err(ProtocolError::InvalidDigest(s.to_string())),
        }
    }
}

impl TryFrom<String> for Digest {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

/// A registry repository name such as `ghcr.io/acme/app`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Repository(String);

impl Repository {
    pub fn new(name: &str) -> ProtocolResult<Self> {
        if name.len() > 255 || !repository_regex().is_match(name) {
            return Err(ProtocolError::InvalidRepository(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Repository {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Repository {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Repository> for String {
    fn from(value: Repository) -> Self {
        value.0
    }
}

/// An immutable, content-addressed artifact reference: `repository@sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub repository: Repository,
    pub digest: Digest,
}

impl Subject {
    pub fn new(repository: Repository, digest: Digest) -> Self {
        Self { repository, digest }
    }

    /// Same digest, different repository.
    pub fn in_repository(&self, repository: Repository) -> Self {
        Self {
            repository,
            digest: self.digest.clone(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.digest)
    }
}

impl FromStr for Subject {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (repository, digest) = s
            .rsplit_once('@')
            .ok_or_else(|| ProtocolError::InvalidSubject(s.to_string()))?;
        Ok(Self {
            repository: repository.parse()?,
            digest: digest.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "4d4f0a0f1e5a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4";

    #[test]
    fn test_parse_subject() {
        let subject: Subject = format!("ghcr.io/acme/app@sha256:{}", HEX).parse().unwrap();
        assert_eq!(subject.repository.as_str(), "ghcr.io/acme/app");
        assert_eq!(subject.digest.hex(), HEX);
        assert_eq!(subject.to_string(), format!("ghcr.io/acme/app@sha256:{}", HEX));
    }

    #[test]
    fn test_registry_with_port() {
        let subject: Subject = format!("localhost:5000/app@sha256:{}", HEX).parse().unwrap();
        assert_eq!(subject.repository.as_str(), "localhost:5000/app");
    }

    #[test]
    fn test_rejects_tag_reference() {
        assert!("ghcr.io/acme/app:latest".parse::<Subject>().is_err());
    }

    #[test]
    fn test_rejects_uppercase_path() {
        assert!(Repository::new("ghcr.io/Acme/app").is_err());
        assert!(Repository::new("").is_err());
        assert!(Repository::new("acme//app").is_err());
    }

    #[test]
    fn test_rejects_bad_digest() {
        assert!("sha512:abcd".parse::<Digest>().is_err());
        assert!("sha256:ABCD".parse::<Digest>().is_err());
        assert!(format!("sha256:{}", &HEX[..63]).parse::<Digest>().is_err());
    }

    #[test]
    fn test_in_repository_keeps_digest() {
        let subject: Subject = format!("ghcr.io/acme/app@sha256:{}", HEX).parse().unwrap();
        let moved = subject.in_repository(Repository::new("registry.local/status").unwrap());
        assert_eq!(moved.digest, subject.digest);
        assert_ne!(moved, subject);
    }

    #[test]
    fn test_digest_serde_as_string() {
        let digest: Digest = format!("sha256:{}", HEX).parse().unwrap();
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"sha256:{}\"", HEX));
        let parsed: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, digest);
    }
}
