//! Layer merging
//!
//! Objects merge key by key, arrays and scalars are replaced by the later
//! layer. An explicit `null` in a later layer clears the value.

use serde_json::map::Entry;
use serde_json::Value;

/// Merge `overlay` on top of `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut merged), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match merged.entry(key) {
                    Entry::Occupied(mut slot) => {
                        let existing = slot.get_mut().take();
                        *slot.get_mut() = deep_merge(existing, value);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                }
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay,
    }
}

/// Merge layers in order; the last layer has the highest precedence.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = deep_merge(
            json!({"log_request_limit": 1000}),
            json!({"log_request_limit": 2000}),
        );
        assert_eq!(result["log_request_limit"], 2000);
    }

    #[test]
    fn test_table_merge_keeps_unset_keys() {
        let result = deep_merge(
            json!({"identity": {"token_env": "A", "token_file": "/var/run/token"}}),
            json!({"identity": {"token_env": "B"}}),
        );
        assert_eq!(result["identity"]["token_env"], "B");
        assert_eq!(result["identity"]["token_file"], "/var/run/token");
    }

    #[test]
    fn test_array_replaced() {
        let result = deep_merge(json!({"mirrors": ["a", "b", "c"]}), json!({"mirrors": ["x"]}));
        assert_eq!(result["mirrors"], json!(["x"]));
    }

    #[test]
    fn test_null_clears() {
        let result = deep_merge(
            json!({"repository_override": "ghcr.io/acme/status"}),
            json!({"repository_override": null}),
        );
        assert!(result["repository_override"].is_null());
    }

    #[test]
    fn test_merge_layers_precedence() {
        let result = merge_layers(vec![
            json!({"user_agent": "builtin", "identity": {"token_env": "BUILTIN"}}),
            json!({"user_agent": "host"}),
            json!({"identity": {"token_env": "FILE"}}),
            json!({"user_agent": "cli"}),
        ]);
        assert_eq!(result["user_agent"], "cli");
        assert_eq!(result["identity"]["token_env"], "FILE");
    }
}
