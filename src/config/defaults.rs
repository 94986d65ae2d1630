//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

use crate::identity::DEFAULT_TOKEN_ENV;
use crate::manager::DEFAULT_USER_AGENT;

/// Values every configuration starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    pub user_agent: String,

    /// Environment variable holding the identity token
    pub token_env: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "user_agent": self.user_agent,
            "identity": {
                "token_env": self.token_env
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.token_env, "STATUS_ATTEST_ID_TOKEN");
        assert!(defaults.user_agent.starts_with("status-attest/"));
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();
        assert!(value.get("log_request_limit").is_none());
        assert_eq!(value["identity"]["token_env"], "STATUS_ATTEST_ID_TOKEN");
        assert!(value.get("ca_url").is_none());
    }
}
