//! Short-lived signing certificates and trust roots.
//!
//! A certificate binds an Ed25519 public key to a signer identity for a short
//! validity window. Chains are leaf-first; the last element is issued directly
//! by a trust anchor key.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::canonical::{b64_decode, b64_encode, sha256_hex, to_canonical_vec};
use crate::error::{ProtocolError, ProtocolResult};

/// SHA-256 fingerprint of an Ed25519 public key (hex-encoded).
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    sha256_hex(key.as_bytes())
}

/// Encode a verifying key to base64 for storage
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    b64_encode(key.as_bytes())
}

/// Decode a verifying key from base64
pub fn decode_verifying_key(encoded: &str) -> ProtocolResult<VerifyingKey> {
    let bytes = b64_decode(encoded)?;
    let bytes_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidKey("key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes_array).map_err(|e| ProtocolError::InvalidKey(e.to_string()))
}

/// Encode a signing key to base64 for storage
pub fn encode_signing_key(key: &SigningKey) -> String {
    b64_encode(&key.to_bytes())
}

/// Decode a signing key from base64
pub fn decode_signing_key(encoded: &str) -> ProtocolResult<SigningKey> {
    let bytes = b64_decode(encoded)?;
    let bytes_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidKey("key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&bytes_array))
}

/// Decode a base64 Ed25519 signature.
pub fn decode_signature(encoded: &str) -> ProtocolResult<Signature> {
    let bytes = b64_decode(encoded)?;
    Signature::from_slice(&bytes).map_err(|e| ProtocolError::InvalidSignature(e.to_string()))
}

/// Signing certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Serial number assigned by the issuer
    pub serial: String,

    /// Identity the key is bound to (token subject for leaves, CA name otherwise)
    pub subject: String,

    /// OIDC issuer that vouched for `subject` (leaf certificates only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_issuer: Option<String>,

    /// Whether this certificate may issue other certificates
    pub is_ca: bool,

    /// Base64-encoded Ed25519 public key
    pub public_key: String,

    pub not_before: DateTime<Utc>,

    pub not_after: DateTime<Utc>,

    /// Fingerprint of the key that signed this certificate
    pub authority_key_id: String,

    /// Base64-encoded signature over the canonical certificate body
    #[serde(default)]
    pub signature: String,
}

/// Fields covered by a certificate signature.
#[derive(Serialize)]
struct CertificateBody<'a> {
    serial: &'a str,
    subject: &'a str,
    oidc_issuer: Option<&'a str>,
    is_ca: bool,
    public_key: &'a str,
    not_before: &'a DateTime<Utc>,
    not_after: &'a DateTime<Utc>,
    authority_key_id: &'a str,
}

impl Certificate {
    /// Sign an unsigned certificate with the issuing key.
    ///
    /// Sets `authority_key_id` from the issuing key before signing.
    pub fn issue(mut self, issuer_key: &SigningKey) -> ProtocolResult<Self> {
        self.authority_key_id = key_fingerprint(&issuer_key.verifying_key());
        let body = self.tbs_bytes()?;
        self.signature = b64_encode(&issuer_key.sign(&body).to_bytes());
        Ok(self)
    }

    /// Canonical bytes covered by the signature.
    pub fn tbs_bytes(&self) -> ProtocolResult<Vec<u8>> {
        to_canonical_vec(&CertificateBody {
            serial: &self.serial,
            subject: &self.subject,
            oidc_issuer: self.oidc_issuer.as_deref(),
            is_ca: self.is_ca,
            public_key: &self.public_key,
            not_before: &self.not_before,
            not_after: &self.not_after,
            authority_key_id: &self.authority_key_id,
        })
    }

    pub fn verifying_key(&self) -> ProtocolResult<VerifyingKey> {
        decode_verifying_key(&self.public_key)
    }

    /// Whether `issuer` signed this certificate.
    pub fn is_issued_by(&self, issuer: &VerifyingKey) -> bool {
        if self.authority_key_id != key_fingerprint(issuer) {
            return false;
        }
        let (Ok(body), Ok(signature)) = (self.tbs_bytes(), decode_signature(&self.signature))
        else {
            return false;
        };
        issuer.verify_strict(&body, &signature).is_ok()
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Leaf-first certificate chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateChain(pub Vec<Certificate>);

impl CertificateChain {
    pub fn leaf(&self) -> Option<&Certificate> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Certificate>> for CertificateChain {
    fn from(value: Vec<Certificate>) -> Self {
        Self(value)
    }
}

/// A root key trusted to issue certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    pub name: String,

    /// Base64-encoded Ed25519 public key
    pub public_key: String,
}

impl TrustAnchor {
    pub fn new(name: &str, key: &VerifyingKey) -> Self {
        Self {
            name: name.to_string(),
            public_key: encode_verifying_key(key),
        }
    }

    pub fn key_id(&self) -> ProtocolResult<String> {
        Ok(key_fingerprint(&decode_verifying_key(&self.public_key)?))
    }
}

/// Certificate authority trust material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedRoot {
    pub anchors: Vec<TrustAnchor>,

    /// Intermediate CA certificates that chains may omit
    #[serde(default)]
    pub intermediates: Vec<Certificate>,
}

impl TrustedRoot {
    pub fn with_anchor(anchor: TrustAnchor) -> Self {
        Self {
            anchors: vec![anchor],
            intermediates: Vec::new(),
        }
    }

    /// Look up an anchor key by fingerprint.
    pub fn anchor_key(&self, key_id: &str) -> Option<VerifyingKey> {
        self.anchors
            .iter()
            .filter_map(|anchor| decode_verifying_key(&anchor.public_key).ok())
            .find(|key| key_fingerprint(key) == key_id)
    }

    /// Look up an intermediate by the fingerprint of its public key.
    pub fn intermediate(&self, key_id: &str) -> Option<&Certificate> {
        self.intermediates.iter().find(|cert| {
            cert.verifying_key()
                .map(|key| key_fingerprint(&key) == key_id)
                .unwrap_or(false)
        })
    }

    /// Merge another root's material into this one.
    pub fn extend(&mut self, other: TrustedRoot) {
        for anchor in other.anchors {
            if !self.anchors.contains(&anchor) {
                self.anchors.push(anchor);
            }
        }
        for cert in other.intermediates {
            if !self.intermediates.contains(&cert) {
                self.intermediates.push(cert);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn unsigned(subject: &str, key: &VerifyingKey, is_ca: bool) -> Certificate {
        let now = Utc::now();
        Certificate {
            serial: "1".to_string(),
            subject: subject.to_string(),
            oidc_issuer: (!is_ca).then(|| "https://issuer.test".to_string()),
            is_ca,
            public_key: encode_verifying_key(key),
            not_before: now - Duration::minutes(1),
            not_after: now + Duration::minutes(10),
            authority_key_id: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let ca = SigningKey::generate(&mut rand::thread_rng());
        let leaf = SigningKey::generate(&mut rand::thread_rng());
        let cert = unsigned("reconciler@test", &leaf.verifying_key(), false)
            .issue(&ca)
            .unwrap();

        assert!(cert.is_issued_by(&ca.verifying_key()));
        assert!(!cert.is_issued_by(&leaf.verifying_key()));
        assert_eq!(cert.verifying_key().unwrap(), leaf.verifying_key());
    }

    #[test]
    fn test_tampered_subject_fails() {
        let ca = SigningKey::generate(&mut rand::thread_rng());
        let leaf = SigningKey::generate(&mut rand::thread_rng());
        let mut cert = unsigned("reconciler@test", &leaf.verifying_key(), false)
            .issue(&ca)
            .unwrap();
        cert.subject = "attacker@test".to_string();

        assert!(!cert.is_issued_by(&ca.verifying_key()));
    }

    #[test]
    fn test_validity_window() {
        let ca = SigningKey::generate(&mut rand::thread_rng());
        let cert = unsigned("ca", &ca.verifying_key(), true).issue(&ca).unwrap();
        assert!(cert.is_valid_at(Utc::now()));
        assert!(!cert.is_valid_at(Utc::now() + Duration::hours(1)));
    }

    #[test]
    fn test_trusted_root_lookup() {
        let ca = SigningKey::generate(&mut rand::thread_rng());
        let root = TrustedRoot::with_anchor(TrustAnchor::new("local", &ca.verifying_key()));
        let key_id = key_fingerprint(&ca.verifying_key());

        assert_eq!(root.anchor_key(&key_id), Some(ca.verifying_key()));
        assert!(root.anchor_key("unknown").is_none());
        assert_eq!(root.anchors[0].key_id().unwrap(), key_id);
    }

    #[test]
    fn test_key_encoding() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let decoded = decode_signing_key(&encode_signing_key(&key)).unwrap();
        assert_eq!(decoded.to_bytes(), key.to_bytes());
        assert!(decode_verifying_key("c2hvcnQ=").is_err());
    }
}
