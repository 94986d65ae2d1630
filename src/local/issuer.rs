//! Local OIDC-style token issuer (HS256).

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretVec};
use serde::Serialize;

use crate::identity::{IdentityError, IdentityToken, TokenClaims};

/// Default lifetime of minted tokens.
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 600;

#[derive(Serialize)]
struct MintClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Mints and validates identity tokens for a local trust domain.
#[derive(Clone)]
pub struct LocalIssuer {
    url: String,
    secret: Arc<SecretVec<u8>>,
}

impl std::fmt::Debug for LocalIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIssuer").field("url", &self.url).finish_non_exhaustive()
    }
}

impl LocalIssuer {
    pub fn new(url: impl Into<String>, secret: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            secret: Arc::new(SecretVec::new(secret)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn secret_bytes(&self) -> &[u8] {
        self.secret.expose_secret()
    }

    /// Mint a token for `subject` valid for `ttl`.
    pub fn mint(&self, subject: &str, audience: &str, ttl: Duration) -> Result<String, IdentityError> {
        let now = Utc::now();
        let claims = MintClaims {
            iss: &self.url,
            sub: subject,
            aud: audience,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret_bytes()),
        )?)
    }

    /// Mint and parse in one step.
    pub fn token(&self, subject: &str, audience: &str, ttl: Duration) -> Result<IdentityToken, IdentityError> {
        IdentityToken::parse(&self.mint(subject, audience, ttl)?)
    }

    /// Check signature, issuer, audience and expiry.
    pub fn validate(&self, raw: &str, audience: &str) -> Result<TokenClaims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(&[&self.url]);
        let data = jsonwebtoken::decode::<TokenClaims>(
            raw,
            &DecodingKey::from_secret(self.secret_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }
}
