//! Identity tokens and the providers that obtain them.
//!
//! A token is a short-lived OIDC JWT. Its claims name the caller
//! (`email` when present, otherwise `sub`) and the issuer that vouched for
//! it; together they form the [`SignerIdentity`] a certificate is issued for.
//! Claim parsing here does not verify the token signature: the certificate
//! authority does that when it exchanges the token.

mod providers;

use std::sync::Arc;

use attest_protocol::SignerIdentity;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{CancelAware, Cancelled, Context};

pub use providers::{
    EnvTokenProvider, FileTokenProvider, StaticTokenProvider, DEFAULT_TOKEN_ENV,
};

/// Audience requested when exchanging a token for a signing certificate.
pub const SIGNING_AUDIENCE: &str = "sigstore";

/// Errors obtaining or parsing an identity token.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no identity token available: {0}")]
    Unavailable(String),

    #[error("I/O error reading identity token: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed identity token: {0}")]
    Malformed(#[from] jsonwebtoken::errors::Error),

    #[error("identity token expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("identity token audience does not include {0:?}")]
    AudienceMismatch(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl CancelAware for IdentityError {
    fn is_cancelled(&self) -> bool {
        matches!(self, IdentityError::Cancelled(_))
    }
}

/// Claims read from an identity token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,

    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// String or array of strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    pub fn audiences(&self) -> Vec<String> {
        match &self.aud {
            Some(serde_json::Value::String(aud)) => vec![aud.clone()],
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A bearer token proving the caller's identity.
#[derive(Debug, Clone)]
pub struct IdentityToken {
    raw: Arc<SecretString>,
    claims: TokenClaims,
}

impl IdentityToken {
    /// Parse a compact JWT without checking its signature.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<TokenClaims>(
            raw.trim(),
            &DecodingKey::from_secret(&[]),
            &validation,
        )?;

        Ok(Self {
            raw: Arc::new(SecretString::new(raw.trim().to_string())),
            claims: data.claims,
        })
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// The raw compact token. Never log this.
    pub fn expose(&self) -> &str {
        self.raw.expose_secret()
    }

    pub fn signer_identity(&self) -> SignerIdentity {
        let subject = self
            .claims
            .email
            .clone()
            .unwrap_or_else(|| self.claims.sub.clone());
        SignerIdentity::new(subject, self.claims.iss.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims
            .exp
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Reject expired tokens and tokens minted for a different audience.
    ///
    /// A token without an `aud` claim is accepted for any audience.
    pub fn check(&self, audience: &str, now: DateTime<Utc>) -> Result<(), IdentityError> {
        if let Some(expires_at) = self.expires_at() {
            if expires_at <= now {
                return Err(IdentityError::Expired(expires_at));
            }
        }
        let audiences = self.claims.audiences();
        if !audiences.is_empty() && !audiences.iter().any(|aud| aud == audience) {
            return Err(IdentityError::AudienceMismatch(audience.to_string()));
        }
        Ok(())
    }
}

/// Exchanges ambient credentials for a short-lived identity token.
pub trait IdentityProvider: Send + Sync {
    fn provide(&self, ctx: &Context, audience: &str) -> Result<IdentityToken, IdentityError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use base64::Engine;
    use serde_json::json;

    /// Unsigned-looking JWT carrying the given claims.
    pub fn token_with_claims(claims: serde_json::Value) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = engine.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
        let payload = engine.encode(claims.to_string());
        let signature = engine.encode(b"not-a-real-signature");
        format!("{}.{}.{}", header, payload, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::token_with_claims;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_prefers_email() {
        let token = IdentityToken::parse(&token_with_claims(json!({
            "iss": "https://issuer.test",
            "sub": "1234",
            "email": "reconciler@example.test",
        })))
        .unwrap();

        assert_eq!(
            token.signer_identity(),
            SignerIdentity::new("reconciler@example.test", "https://issuer.test")
        );
    }

    #[test]
    fn test_parse_falls_back_to_sub() {
        let token = IdentityToken::parse(&token_with_claims(json!({
            "iss": "https://kubernetes.default.svc",
            "sub": "system:serviceaccount:ops:reconciler",
        })))
        .unwrap();

        assert_eq!(
            token.signer_identity().subject,
            "system:serviceaccount:ops:reconciler"
        );
    }

    #[test]
    fn test_malformed_token() {
        assert!(matches!(
            IdentityToken::parse("not-a-jwt"),
            Err(IdentityError::Malformed(_))
        ));
    }

    #[test]
    fn test_check_expiry_and_audience() {
        let now = Utc::now();
        let token = IdentityToken::parse(&token_with_claims(json!({
            "iss": "i",
            "sub": "s",
            "aud": ["sigstore", "other"],
            "exp": now.timestamp() + 60,
        })))
        .unwrap();

        assert!(token.check("sigstore", now).is_ok());
        assert!(matches!(
            token.check("elsewhere", now),
            Err(IdentityError::AudienceMismatch(_))
        ));
        assert!(matches!(
            token.check("sigstore", now + chrono::Duration::seconds(120)),
            Err(IdentityError::Expired(_))
        ));
    }

    #[test]
    fn test_debug_redacts_raw_token() {
        let raw = token_with_claims(json!({"iss": "i", "sub": "s"}));
        let token = IdentityToken::parse(&raw).unwrap();
        assert!(!format!("{:?}", token).contains(&raw));
        assert_eq!(token.expose(), raw);
    }
}
