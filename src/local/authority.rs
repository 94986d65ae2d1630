//! Local certificate authority.
//!
//! Root key → intermediate CA certificate → short-lived leaf certificates.
//! Leaves are issued only for tokens minted by the authority's own
//! [`LocalIssuer`], and only when the request proves possession of the key.

use std::fs;
use std::path::Path;

use attest_protocol::certificate::{
    decode_signing_key, encode_signing_key, encode_verifying_key,
};
use attest_protocol::{Certificate, CertificateChain, TrustAnchor, TrustedRoot};
use base64::Engine;
use chrono::{Duration, Utc};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::issuer::LocalIssuer;
use crate::context::Context;
use crate::identity::{IdentityToken, SIGNING_AUDIENCE};
use crate::signer::{CertificateAuthority, SignError};

/// State file inside an authority directory.
pub const AUTHORITY_FILE: &str = "authority.json";

/// Default leaf certificate lifetime.
pub const DEFAULT_CERTIFICATE_TTL_SECONDS: i64 = 600;

const INTERMEDIATE_TTL_DAYS: i64 = 3650;

#[derive(Serialize, Deserialize)]
struct AuthorityState {
    name: String,
    root_key: String,
    intermediate_key: String,
    intermediate: Certificate,
    issuer_url: String,
    issuer_secret: String,
    certificate_ttl_seconds: i64,
}

/// Certificate authority backed by keys held in memory or in a directory.
pub struct LocalAuthority {
    name: String,
    root_key: SigningKey,
    intermediate_key: SigningKey,
    intermediate: Certificate,
    issuer: LocalIssuer,
    certificate_ttl: Duration,
}

impl LocalAuthority {
    /// Create a fresh authority with new keys.
    pub fn generate(name: &str, issuer: LocalIssuer) -> Result<Self, SignError> {
        let mut rng = rand::thread_rng();
        let root_key = SigningKey::generate(&mut rng);
        let intermediate_key = SigningKey::generate(&mut rng);
        let now = Utc::now();

        let intermediate = Certificate {
            serial: uuid::Uuid::new_v4().to_string(),
            subject: format!("{} intermediate", name),
            oidc_issuer: None,
            is_ca: true,
            public_key: encode_verifying_key(&intermediate_key.verifying_key()),
            not_before: now - Duration::minutes(1),
            not_after: now + Duration::days(INTERMEDIATE_TTL_DAYS),
            authority_key_id: String::new(),
            signature: String::new(),
        }
        .issue(&root_key)?;

        Ok(Self {
            name: name.to_string(),
            root_key,
            intermediate_key,
            intermediate,
            issuer,
            certificate_ttl: Duration::seconds(DEFAULT_CERTIFICATE_TTL_SECONDS),
        })
    }

    /// Load the authority stored in `dir`, creating one on first use.
    pub fn open(dir: &Path) -> Result<Self, SignError> {
        let path = dir.join(AUTHORITY_FILE);
        if path.exists() {
            let state: AuthorityState = serde_json::from_str(&fs::read_to_string(&path)?)
                .map_err(|e| SignError::Unavailable(format!("{}: {}", path.display(), e)))?;
            return Self::from_state(state);
        }

        fs::create_dir_all(dir)?;
        let secret: [u8; 32] = rand::random();
        let issuer = LocalIssuer::new(format!("file://{}", dir.display()), secret.to_vec());
        let authority = Self::generate("status-attest local authority", issuer)?;

        let temp_path = dir.join(format!(".{}.tmp", AUTHORITY_FILE));
        let json = serde_json::to_string_pretty(&authority.to_state())
            .map_err(|e| SignError::Unavailable(e.to_string()))?;
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &path)?;

        info!(path = %path.display(), "created local certificate authority");
        Ok(authority)
    }

    fn from_state(state: AuthorityState) -> Result<Self, SignError> {
        let secret = base64::engine::general_purpose::STANDARD
            .decode(&state.issuer_secret)
            .map_err(|e| SignError::Unavailable(format!("issuer secret: {}", e)))?;
        Ok(Self {
            name: state.name,
            root_key: decode_signing_key(&state.root_key)?,
            intermediate_key: decode_signing_key(&state.intermediate_key)?,
            intermediate: state.intermediate,
            issuer: LocalIssuer::new(state.issuer_url, secret),
            certificate_ttl: Duration::seconds(state.certificate_ttl_seconds),
        })
    }

    fn to_state(&self) -> AuthorityState {
        AuthorityState {
            name: self.name.clone(),
            root_key: encode_signing_key(&self.root_key),
            intermediate_key: encode_signing_key(&self.intermediate_key),
            intermediate: self.intermediate.clone(),
            issuer_url: self.issuer.url().to_string(),
            issuer_secret: base64::engine::general_purpose::STANDARD
                .encode(self.issuer.secret_bytes()),
            certificate_ttl_seconds: self.certificate_ttl.num_seconds(),
        }
    }

    pub fn with_certificate_ttl(mut self, ttl: Duration) -> Self {
        self.certificate_ttl = ttl;
        self
    }

    pub fn issuer(&self) -> &LocalIssuer {
        &self.issuer
    }

    pub fn root_key(&self) -> VerifyingKey {
        self.root_key.verifying_key()
    }
}

impl CertificateAuthority for LocalAuthority {
    fn issue(
        &self,
        ctx: &Context,
        token: &IdentityToken,
        public_key: &VerifyingKey,
        proof: &[u8],
    ) -> Result<CertificateChain, SignError> {
        ctx.check()?;
        let claims = self
            .issuer
            .validate(token.expose(), SIGNING_AUDIENCE)
            .map_err(|e| SignError::Rejected(format!("token: {}", e)))?;

        let proof = Signature::from_slice(proof)
            .map_err(|_| SignError::Rejected("malformed proof of possession".to_string()))?;
        public_key
            .verify_strict(claims.sub.as_bytes(), &proof)
            .map_err(|_| SignError::Rejected("proof of possession does not verify".to_string()))?;

        let now = Utc::now();
        let leaf = Certificate {
            serial: uuid::Uuid::new_v4().to_string(),
            subject: claims.email.clone().unwrap_or_else(|| claims.sub.clone()),
            oidc_issuer: Some(claims.iss.clone()),
            is_ca: false,
            public_key: encode_verifying_key(public_key),
            not_before: now - Duration::seconds(30),
            not_after: now + self.certificate_ttl,
            authority_key_id: String::new(),
            signature: String::new(),
        }
        .issue(&self.intermediate_key)?;

        Ok(CertificateChain::from(vec![leaf, self.intermediate.clone()]))
    }

    fn trusted_root(&self, ctx: &Context) -> Result<TrustedRoot, SignError> {
        ctx.check()?;
        Ok(TrustedRoot::with_anchor(TrustAnchor::new(
            &self.name,
            &self.root_key.verifying_key(),
        )))
    }
}
