//! Typed view of the merged configuration.

use std::path::PathBuf;
use std::sync::Arc;

use attest_protocol::SignerIdentity;
use serde::{Deserialize, Serialize};

use crate::identity::{EnvTokenProvider, FileTokenProvider, IdentityProvider, DEFAULT_TOKEN_ENV};
use crate::local::LocalDomain;
use crate::manager::{Options, DEFAULT_USER_AGENT};

/// Where the identity token comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    pub token_env: String,

    /// Projected token file; read instead of `token_env` when set
    pub token_file: Option<PathBuf>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            token_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedIdentity {
    pub subject: String,
    pub issuer: String,
}

/// Settings a status manager is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Local trust domain; supplies any endpoint not set explicitly
    pub domain: Option<PathBuf>,

    pub ca_url: Option<String>,
    pub log_url: Option<String>,
    pub registry_url: Option<String>,
    pub repository_override: Option<String>,
    pub user_agent: String,

    /// Overrides the request limit a `file://` log reports
    pub log_request_limit: Option<usize>,
    pub identity: IdentitySettings,
    pub expected_identity: Option<ExpectedIdentity>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            domain: None,
            ca_url: None,
            log_url: None,
            registry_url: None,
            repository_override: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            log_request_limit: None,
            identity: IdentitySettings::default(),
            expected_identity: None,
        }
    }
}

impl StatusConfig {
    fn local_domain(&self) -> Option<LocalDomain> {
        self.domain.as_ref().map(LocalDomain::at)
    }

    pub fn effective_ca_url(&self) -> Option<String> {
        self.ca_url
            .clone()
            .or_else(|| self.local_domain().map(|d| d.ca_url()))
    }

    pub fn effective_log_url(&self) -> Option<String> {
        self.log_url
            .clone()
            .or_else(|| self.local_domain().map(|d| d.log_url()))
    }

    pub fn effective_registry_url(&self) -> Option<String> {
        self.registry_url
            .clone()
            .or_else(|| self.local_domain().map(|d| d.registry_url()))
    }

    pub fn identity_provider(&self) -> Arc<dyn IdentityProvider> {
        match &self.identity.token_file {
            Some(path) => Arc::new(FileTokenProvider::new(path.clone())),
            None => Arc::new(EnvTokenProvider::new(self.identity.token_env.clone())),
        }
    }

    /// Manager options for these settings.
    pub fn to_options(&self) -> Options {
        let mut options = Options::new()
            .with_user_agent(self.user_agent.clone())
            .with_identity_provider(self.identity_provider());

        if let Some(limit) = self.log_request_limit {
            options = options.with_log_request_limit(limit);
        }
        if let Some(url) = self.effective_ca_url() {
            options = options.with_ca_url(url);
        }
        if let Some(url) = self.effective_log_url() {
            options = options.with_log_url(url);
        }
        if let Some(url) = self.effective_registry_url() {
            options = options.with_registry_url(url);
        }
        if let Some(repository) = &self.repository_override {
            options = options.with_repository_override(repository.clone());
        }
        if let Some(expected) = &self.expected_identity {
            options = options.with_expected_identity(SignerIdentity::new(
                expected.subject.clone(),
                expected.issuer.clone(),
            ));
        }
        options
    }
}
