//! Built-in identity providers.

use std::fs;
use std::path::PathBuf;

use super::{IdentityError, IdentityProvider, IdentityToken};
use crate::context::Context;

/// Environment variable read by [`EnvTokenProvider`] by default.
pub const DEFAULT_TOKEN_ENV: &str = "STATUS_ATTEST_ID_TOKEN";

/// Returns the same token on every call.
pub struct StaticTokenProvider {
    token: IdentityToken,
}

impl StaticTokenProvider {
    pub fn new(raw: &str) -> Result<Self, IdentityError> {
        Ok(Self {
            token: IdentityToken::parse(raw)?,
        })
    }
}

impl IdentityProvider for StaticTokenProvider {
    fn provide(&self, ctx: &Context, audience: &str) -> Result<IdentityToken, IdentityError> {
        ctx.check()?;
        self.token.check(audience, chrono::Utc::now())?;
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every call.
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvTokenProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENV)
    }
}

impl IdentityProvider for EnvTokenProvider {
    fn provide(&self, ctx: &Context, audience: &str) -> Result<IdentityToken, IdentityError> {
        ctx.check()?;
        let raw = std::env::var(&self.var)
            .map_err(|_| IdentityError::Unavailable(format!("{} is not set", self.var)))?;
        let token = IdentityToken::parse(&raw)?;
        token.check(audience, chrono::Utc::now())?;
        Ok(token)
    }
}

/// Reads a projected token file (re-read on every call so rotation is picked up).
pub struct FileTokenProvider {
    path: PathBuf,
}

impl FileTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityProvider for FileTokenProvider {
    fn provide(&self, ctx: &Context, audience: &str) -> Result<IdentityToken, IdentityError> {
        ctx.check()?;
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Err(IdentityError::Unavailable(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        let token = IdentityToken::parse(&raw)?;
        token.check(audience, chrono::Utc::now())?;
        Ok(token)
    }
}
