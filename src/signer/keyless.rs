//! Keyless signer: ephemeral Ed25519 keys certified per identity token.

use std::sync::{Arc, Mutex};

use attest_protocol::{CertificateChain, SignerIdentity};
use chrono::{Duration, Utc};
use ed25519_dalek::{Signer as _, SigningKey};
use tracing::debug;

use super::{CertificateAuthority, SignError, Signature, Signer};
use crate::context::Context;
use crate::identity::{IdentityProvider, SIGNING_AUDIENCE};

/// Refresh the certificate when it has less than this long left.
pub const DEFAULT_REFRESH_WINDOW_SECONDS: i64 = 60;

struct Credential {
    key: SigningKey,
    chain: CertificateChain,
    identity: SignerIdentity,
}

impl Credential {
    fn needs_refresh(&self, window: Duration) -> bool {
        match self.chain.leaf() {
            Some(leaf) => leaf.not_after - Utc::now() < window,
            None => true,
        }
    }
}

/// Signer backed by a certificate authority and an identity provider.
///
/// Holds one ephemeral key at a time. The key is replaced, together with a
/// freshly obtained token, once its certificate nears expiry.
pub struct KeylessSigner {
    authority: Arc<dyn CertificateAuthority>,
    provider: Arc<dyn IdentityProvider>,
    audience: String,
    refresh_window: Duration,
    credential: Mutex<Credential>,
}

impl KeylessSigner {
    /// Obtain the first credential. Fails if the identity or CA is unreachable.
    pub fn new(
        ctx: &Context,
        authority: Arc<dyn CertificateAuthority>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, SignError> {
        let credential = Self::obtain(ctx, authority.as_ref(), provider.as_ref(), SIGNING_AUDIENCE)?;
        Ok(Self {
            authority,
            provider,
            audience: SIGNING_AUDIENCE.to_string(),
            refresh_window: Duration::seconds(DEFAULT_REFRESH_WINDOW_SECONDS),
            credential: Mutex::new(credential),
        })
    }

    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    /// Identity the current certificate was issued for.
    pub fn identity(&self) -> Option<SignerIdentity> {
        self.credential.lock().ok().map(|c| c.identity.clone())
    }

    fn obtain(
        ctx: &Context,
        authority: &dyn CertificateAuthority,
        provider: &dyn IdentityProvider,
        audience: &str,
    ) -> Result<Credential, SignError> {
        let token = provider.provide(ctx, audience)?;
        let key = SigningKey::generate(&mut rand::thread_rng());
        let proof = key.sign(token.claims().sub.as_bytes());

        ctx.check()?;
        let chain = authority.issue(ctx, &token, &key.verifying_key(), &proof.to_bytes())?;
        let leaf = chain
            .leaf()
            .ok_or_else(|| SignError::Rejected("authority returned an empty chain".to_string()))?;
        let identity = SignerIdentity::new(
            leaf.subject.clone(),
            leaf.oidc_issuer.clone().unwrap_or_default(),
        );

        debug!(
            identity = %identity,
            not_after = %leaf.not_after,
            "obtained signing certificate"
        );

        Ok(Credential {
            key,
            chain,
            identity,
        })
    }
}

impl Signer for KeylessSigner {
    fn sign(&self, ctx: &Context, payload: &[u8]) -> Result<Signature, SignError> {
        ctx.check()?;
        let mut credential = self
            .credential
            .lock()
            .map_err(|_| SignError::Unavailable("signing credential lock poisoned".to_string()))?;

        if credential.needs_refresh(self.refresh_window) {
            *credential = Self::obtain(
                ctx,
                self.authority.as_ref(),
                self.provider.as_ref(),
                &self.audience,
            )?;
        }

        Ok(Signature {
            bytes: credential.key.sign(payload).to_bytes().to_vec(),
            certificate_chain: credential.chain.clone(),
        })
    }
}
