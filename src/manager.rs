//! Per-identity status managers.
//!
//! A [`Manager`] is built once per reconciler identity and is immutable
//! afterwards. It resolves every capability up front so that a failing
//! identity provider, certificate authority, log or store surfaces as a
//! [`ConfigError`] at startup rather than on the first read or write.

use std::marker::PhantomData;
use std::sync::Arc;

use attest_protocol::{Repository, SignerIdentity, Subject, TrustedRoot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::codec::{payload_limit, predicate_type, StatusCodec};
use crate::context::Context;
use crate::error::ConfigError;
use crate::identity::{EnvTokenProvider, IdentityProvider, SIGNING_AUDIENCE};
use crate::local::{file_url_path, LocalAuthority, LocalLog, DEFAULT_LOG_REQUEST_LIMIT};
use crate::session::Session;
use crate::signer::{CertificateAuthority, KeylessSigner, Signer};
use crate::store::{AttestationStore, FileStore};
use crate::tlog::TransparencyLog;

/// Default `User-Agent` reported to remote capabilities.
pub const DEFAULT_USER_AGENT: &str = concat!("status-attest/", env!("CARGO_PKG_VERSION"));

/// Manager construction options.
///
/// Endpoints given as URLs are connected during construction; injected
/// capabilities take precedence over URLs.
#[derive(Clone, Default)]
pub struct Options {
    ca_url: Option<String>,
    log_url: Option<String>,
    registry_url: Option<String>,
    repository_override: Option<String>,
    signer: Option<Arc<dyn Signer>>,
    certificate_authority: Option<Arc<dyn CertificateAuthority>>,
    transparency_log: Option<Arc<dyn TransparencyLog>>,
    store: Option<Arc<dyn AttestationStore>>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    trusted_root: Option<TrustedRoot>,
    user_agent: Option<String>,
    expected_identity: Option<SignerIdentity>,
    log_request_limit: Option<usize>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_url(mut self, url: impl Into<String>) -> Self {
        self.ca_url = Some(url.into());
        self
    }

    pub fn with_log_url(mut self, url: impl Into<String>) -> Self {
        self.log_url = Some(url.into());
        self
    }

    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = Some(url.into());
        self
    }

    /// Store attestations in `repository` instead of the subject's own.
    pub fn with_repository_override(mut self, repository: impl Into<String>) -> Self {
        self.repository_override = Some(repository.into());
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_certificate_authority(mut self, authority: Arc<dyn CertificateAuthority>) -> Self {
        self.certificate_authority = Some(authority);
        self
    }

    pub fn with_transparency_log(mut self, log: Arc<dyn TransparencyLog>) -> Self {
        self.transparency_log = Some(log);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AttestationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    /// Trust roots to verify against instead of the certificate authority's.
    pub fn with_trusted_root(mut self, root: TrustedRoot) -> Self {
        self.trusted_root = Some(root);
        self
    }

    /// `User-Agent` for remote clients built on top of the manager.
    ///
    /// The `file://` capabilities make no requests; injected clients read it
    /// back through [`Manager::user_agent`].
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Only trust statuses signed by this identity.
    pub fn with_expected_identity(mut self, identity: SignerIdentity) -> Self {
        self.expected_identity = Some(identity);
        self
    }

    /// Request size limit of the transparency log front end.
    ///
    /// Defaults to the limit a `file://` log was created with, else 32 MiB.
    pub fn with_log_request_limit(mut self, limit: usize) -> Self {
        self.log_request_limit = Some(limit);
        self
    }
}

pub(crate) struct ManagerInner {
    pub(crate) identity: String,
    pub(crate) predicate_type: String,
    pub(crate) signer: Option<Arc<dyn Signer>>,
    pub(crate) log: Arc<dyn TransparencyLog>,
    pub(crate) store: Arc<dyn AttestationStore>,
    pub(crate) trusted_root: TrustedRoot,
    pub(crate) expected_identity: SignerIdentity,
    pub(crate) repository_override: Option<Repository>,
    pub(crate) payload_limit: usize,
    pub(crate) user_agent: String,
}

/// Immutable status configuration for one reconciler identity.
///
/// Cheap to clone; clones share the same capabilities.
pub struct Manager<T> {
    pub(crate) inner: Arc<ManagerInner>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for Manager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _payload: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Manager<T> {
    /// Writable manager. Signs with `options`' signer, or with a keyless
    /// signer backed by its identity provider and certificate authority.
    pub fn new(ctx: &Context, identity: &str, options: Options) -> Result<Self, ConfigError> {
        Self::build(ctx, identity, options, false)
    }

    /// Manager that can only read. Requires an expected signer identity.
    pub fn new_read_only(
        ctx: &Context,
        identity: &str,
        options: Options,
    ) -> Result<Self, ConfigError> {
        Self::build(ctx, identity, options, true)
    }

    fn build(
        ctx: &Context,
        identity: &str,
        options: Options,
        read_only: bool,
    ) -> Result<Self, ConfigError> {
        if identity.is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }
        if read_only && options.expected_identity.is_none() {
            return Err(ConfigError::MissingExpectedIdentity);
        }
        ctx.check()?;

        let needs_keyless = !read_only && options.signer.is_none();
        let authority = match (&options.certificate_authority, &options.ca_url) {
            (Some(authority), _) => Some(Arc::clone(authority)),
            (None, Some(url)) => Some(connect_authority(url)?),
            (None, None) if needs_keyless || options.trusted_root.is_none() => {
                return Err(ConfigError::MissingEndpoint("certificate authority"))
            }
            (None, None) => None,
        };

        let trusted_root = match (options.trusted_root, &authority) {
            (Some(root), _) => root,
            (None, Some(authority)) => authority.trusted_root(ctx)?,
            (None, None) => return Err(ConfigError::MissingEndpoint("trusted root")),
        };

        // a connected log reports its own request limit; injected ones cannot
        let (log, connected_limit): (Arc<dyn TransparencyLog>, Option<usize>) =
            match (options.transparency_log, &options.log_url) {
                (Some(log), _) => (log, None),
                (None, Some(url)) => {
                    let log = connect_log(url)?;
                    let limit = log.request_limit();
                    (log as Arc<dyn TransparencyLog>, Some(limit))
                }
                (None, None) => return Err(ConfigError::MissingEndpoint("transparency log")),
            };

        let store = match (options.store, &options.registry_url) {
            (Some(store), _) => store,
            (None, Some(url)) => connect_store(url)?,
            (None, None) => return Err(ConfigError::MissingEndpoint("registry")),
        };

        let provider: Arc<dyn IdentityProvider> = match options.identity_provider {
            Some(provider) => provider,
            None => Arc::new(EnvTokenProvider::default()),
        };

        let mut signer_identity = None;
        let signer: Option<Arc<dyn Signer>> = match (read_only, options.signer) {
            (true, _) => None,
            (false, Some(signer)) => Some(signer),
            (false, None) => {
                let authority = authority
                    .ok_or(ConfigError::MissingEndpoint("certificate authority"))?;
                let keyless = KeylessSigner::new(ctx, authority, Arc::clone(&provider))?;
                signer_identity = keyless.identity();
                Some(Arc::new(keyless))
            }
        };

        let expected_identity = match (options.expected_identity, signer_identity) {
            (Some(expected), _) => expected,
            (None, Some(own)) => own,
            (None, None) => provider.provide(ctx, SIGNING_AUDIENCE)?.signer_identity(),
        };

        let repository_override = options
            .repository_override
            .map(|value| {
                Repository::new(&value)
                    .map_err(|source| ConfigError::InvalidRepositoryOverride { value, source })
            })
            .transpose()?;

        let inner = ManagerInner {
            identity: identity.to_string(),
            predicate_type: predicate_type(identity),
            signer,
            log,
            store,
            trusted_root,
            expected_identity,
            repository_override,
            payload_limit: payload_limit(
                options
                    .log_request_limit
                    .or(connected_limit)
                    .unwrap_or(DEFAULT_LOG_REQUEST_LIMIT),
            ),
            user_agent: options
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        };

        info!(
            identity = %inner.identity,
            expected_identity = %inner.expected_identity,
            read_only,
            "status manager ready"
        );
        debug!(
            predicate_type = %inner.predicate_type,
            payload_limit = inner.payload_limit,
            user_agent = %inner.user_agent,
            "status manager settings"
        );

        Ok(Self {
            inner: Arc::new(inner),
            _payload: PhantomData,
        })
    }

    /// Session bound to `subject`.
    pub fn new_session(&self, subject: Subject) -> Session<T> {
        Session::new(self.clone(), subject)
    }

    pub(crate) fn codec(&self) -> StatusCodec<T> {
        StatusCodec::new(self.inner.predicate_type.clone(), self.inner.payload_limit)
    }
}

impl<T> Manager<T> {
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn predicate_type(&self) -> &str {
        &self.inner.predicate_type
    }

    /// Identity a status must be signed by to be trusted.
    pub fn expected_identity(&self) -> &SignerIdentity {
        &self.inner.expected_identity
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.signer.is_none()
    }

    /// Largest status details, in canonical JSON bytes, a write accepts.
    pub fn payload_limit(&self) -> usize {
        self.inner.payload_limit
    }

    /// `User-Agent` to send from injected remote clients.
    pub fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    pub fn repository_override(&self) -> Option<&Repository> {
        self.inner.repository_override.as_ref()
    }
}

fn endpoint_dir(option: &'static str, url: &str) -> Result<std::path::PathBuf, ConfigError> {
    file_url_path(url).ok_or_else(|| ConfigError::UnsupportedEndpoint {
        option,
        url: url.to_string(),
    })
}

fn connect_authority(url: &str) -> Result<Arc<dyn CertificateAuthority>, ConfigError> {
    let dir = endpoint_dir("ca_url", url)?;
    Ok(Arc::new(LocalAuthority::open(&dir)?))
}

fn connect_log(url: &str) -> Result<Arc<LocalLog>, ConfigError> {
    let dir = endpoint_dir("log_url", url)?;
    Ok(Arc::new(LocalLog::open(&dir)?))
}

fn connect_store(url: &str) -> Result<Arc<dyn AttestationStore>, ConfigError> {
    let dir = endpoint_dir("registry_url", url)?;
    Ok(Arc::new(FileStore::open(dir)?))
}
