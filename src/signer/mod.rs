//! Signing capabilities.
//!
//! A [`Signer`] turns payload bytes into a signature plus the certificate
//! chain that binds the signing key to an identity. The keyless
//! implementation obtains a fresh ephemeral key and certificate from a
//! [`CertificateAuthority`] by presenting an identity token.

mod keyless;

use attest_protocol::{CertificateChain, ProtocolError, TrustedRoot};
use ed25519_dalek::VerifyingKey;
use thiserror::Error;

use crate::context::{CancelAware, Cancelled, Context};
use crate::identity::{IdentityError, IdentityToken};

pub use keyless::{KeylessSigner, DEFAULT_REFRESH_WINDOW_SECONDS};

/// Errors from signing or certificate issuance.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("certificate request rejected: {0}")]
    Rejected(String),

    #[error("certificate authority unavailable: {0}")]
    Unavailable(String),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl CancelAware for SignError {
    fn is_cancelled(&self) -> bool {
        match self {
            SignError::Cancelled(_) => true,
            SignError::Identity(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Result of signing a payload.
#[derive(Debug, Clone)]
pub struct Signature {
    pub bytes: Vec<u8>,

    /// Leaf-first chain for the key that produced `bytes`
    pub certificate_chain: CertificateChain,
}

/// Signs byte payloads.
pub trait Signer: Send + Sync {
    fn sign(&self, ctx: &Context, payload: &[u8]) -> Result<Signature, SignError>;
}

/// Issues short-lived signing certificates in exchange for identity tokens.
pub trait CertificateAuthority: Send + Sync {
    /// Exchange a token for a certificate chain over `public_key`.
    ///
    /// `proof` is a signature by the private key over the token's `sub`
    /// claim, proving possession of the key being certified.
    fn issue(
        &self,
        ctx: &Context,
        token: &IdentityToken,
        public_key: &VerifyingKey,
        proof: &[u8],
    ) -> Result<CertificateChain, SignError>;

    /// Roots that chains issued by this authority terminate in.
    fn trusted_root(&self, ctx: &Context) -> Result<TrustedRoot, SignError>;
}
