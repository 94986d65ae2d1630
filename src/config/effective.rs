//! Effective configuration with provenance
//!
//! Records which sources contributed (with a digest of each file) and which
//! keys were redacted from the printable view.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::StatusConfig;

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "status-attest/effective_config@1";

/// Host config location relative to `$HOME`
pub const HOST_CONFIG_RELATIVE: &str = ".config/status-attest/config.toml";

/// Key names whose values never appear in the printable view.
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "private_key", "api_key", "credential"];

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    File,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Merged configuration, its provenance, and the typed settings.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,

    /// Merged configuration with secrets redacted
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,

    #[serde(skip)]
    pub settings: StatusConfig,
}

/// `~/.config/status-attest/config.toml`, if `$HOME` is set.
pub fn host_config_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(HOST_CONFIG_RELATIVE))
}

impl EffectiveConfig {
    /// Merge the layers. A missing host file is skipped; a missing explicit
    /// file is an error.
    pub fn build(
        host_config_path: Option<&Path>,
        config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigFileError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = host_config_path.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Host,
                path: Some(path.display().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(path) = config_path {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.display().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let settings: StatusConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConfigFileError::Validation(e.to_string()))?;
        validate(&settings)?;

        let mut config = merged;
        let mut redactions = Vec::new();
        redact(&mut config, "", &mut redactions);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config,
            sources,
            redactions,
            settings,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Value at a dot-separated path in the redacted view.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.config, |current, part| current.get(part))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }
}

fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigFileError> {
    let bytes = fs::read(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let parse_error = |message: String| ConfigFileError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let contents =
        String::from_utf8(bytes).map_err(|e| parse_error(format!("invalid UTF-8: {}", e)))?;
    let value: Value = toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;

    Ok((value, digest))
}

fn validate(settings: &StatusConfig) -> Result<(), ConfigFileError> {
    if settings.log_request_limit == Some(0) {
        return Err(ConfigFileError::Validation(
            "log_request_limit must be greater than zero".to_string(),
        ));
    }
    if settings.user_agent.trim().is_empty() {
        return Err(ConfigFileError::Validation(
            "user_agent must not be empty".to_string(),
        ));
    }
    if settings.identity.token_env.is_empty() && settings.identity.token_file.is_none() {
        return Err(ConfigFileError::Validation(
            "identity.token_env or identity.token_file is required".to_string(),
        ));
    }
    Ok(())
}

/// `token` and `api_token` are secrets; `token_env` and `token_file` are not.
fn is_secret_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SECRET_KEYS
        .iter()
        .any(|secret| key == *secret || key.ends_with(&format!("_{}", secret)))
}

fn redact(value: &mut Value, path: &str, redactions: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let current = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                if is_secret_key(key) && !val.is_object() && !val.is_array() {
                    *val = Value::String("[REDACTED]".to_string());
                    redactions.push(current);
                } else {
                    redact(val, &current, redactions);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                redact(item, &format!("{}[{}]", path, i), redactions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_build_with_defaults_only() {
        let config = EffectiveConfig::build(None, None, None).unwrap();
        assert_eq!(config.schema_id, SCHEMA_ID);
        assert_eq!(config.settings, StatusConfig::default());
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_layers_in_order() {
        let mut host = NamedTempFile::new().unwrap();
        writeln!(host, "user_agent = \"host-agent\"").unwrap();
        writeln!(host, "log_request_limit = 1700").unwrap();

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "user_agent = \"file-agent\"").unwrap();
        writeln!(file, "[expected_identity]").unwrap();
        writeln!(file, "subject = \"ci@example.com\"").unwrap();
        writeln!(file, "issuer = \"https://issuer.test\"").unwrap();

        let cli = serde_json::json!({"repository_override": "ghcr.io/acme/status"});
        let config =
            EffectiveConfig::build(Some(host.path()), Some(file.path()), Some(cli)).unwrap();

        assert_eq!(config.settings.user_agent, "file-agent");
        assert_eq!(config.settings.log_request_limit, Some(1700));
        assert_eq!(
            config.settings.repository_override.as_deref(),
            Some("ghcr.io/acme/status")
        );
        assert_eq!(
            config.get_str("expected_identity.subject"),
            Some("ci@example.com")
        );

        let origins: Vec<_> = config.sources.iter().map(|s| s.origin.clone()).collect();
        assert_eq!(
            origins,
            vec![
                ConfigOrigin::Builtin,
                ConfigOrigin::Host,
                ConfigOrigin::File,
                ConfigOrigin::Cli
            ]
        );
        assert_eq!(config.sources[1].digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_missing_host_file_skipped() {
        let config =
            EffectiveConfig::build(Some(Path::new("/nonexistent/config.toml")), None, None).unwrap();
        assert_eq!(config.sources.len(), 1);
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let result = EffectiveConfig::build(None, Some(Path::new("/nonexistent/config.toml")), None);
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "user_agent = ").unwrap();
        let result = EffectiveConfig::build(None, Some(file.path()), None);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_zero_log_limit_rejected() {
        let cli = serde_json::json!({"log_request_limit": 0});
        let result = EffectiveConfig::build(None, None, Some(cli));
        assert!(result.unwrap_err().to_string().contains("log_request_limit"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let cli = serde_json::json!({"log_request_limit": "lots"});
        assert!(matches!(
            EffectiveConfig::build(None, None, Some(cli)),
            Err(ConfigFileError::Validation(_))
        ));
    }

    #[test]
    fn test_secret_redaction() {
        let cli = serde_json::json!({
            "identity": {
                "token": "eyJhbGciOi...",
                "token_env": "MY_TOKEN"
            },
            "registry_api_key": "abc"
        });
        let config = EffectiveConfig::build(None, None, Some(cli)).unwrap();

        assert_eq!(config.get_str("identity.token"), Some("[REDACTED]"));
        assert_eq!(config.get_str("identity.token_env"), Some("MY_TOKEN"));
        assert_eq!(config.get_str("registry_api_key"), Some("[REDACTED]"));
        assert!(config.redactions.contains(&"identity.token".to_string()));
        assert_eq!(config.settings.identity.token_env, "MY_TOKEN");
    }
}
