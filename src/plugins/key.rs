//! Deterministic cache keys for plugin instances.
//!
//! Two requests for the same plugin with configs that differ only in key
//! order must land on the same cached instance, so the config is
//! canonicalized (keys sorted at every depth) before hashing.

use serde::Serialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::error::PluginError;

/// Hex characters kept from the SHA-256 digest.
const KEY_LEN: usize = 16;

/// Convert a package name into a remote name.
///
/// `"@curatedotfun/telegram"` becomes `"curatedotfun_telegram"`.
pub fn normalize_name(package: &str) -> String {
    package.to_lowercase().replacen('@', "", 1).replacen('/', "_", 1)
}

/// Build the instance key for `name` configured with `config`.
///
/// Fails when `config` cannot be represented as JSON (for example a map
/// with non-string keys).
pub fn instance_key<C>(name: &str, config: &C) -> Result<String, PluginError>
where
    C: Serialize + ?Sized,
{
    let config = serde_json::to_value(config).map_err(|e| PluginError::Key {
        name: name.to_string(),
        reason: format!("config is not serializable: {e}"),
    })?;
    let config = match config {
        Value::Null => Value::Object(Map::new()),
        other => sort_keys(other),
    };

    let canonical = sort_keys(json!({ "name": name, "config": config }));
    let bytes = serde_json::to_vec(&canonical).map_err(|e| PluginError::Key {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    let mut digest = hex::encode(Sha256::digest(&bytes));
    digest.truncate(KEY_LEN);
    Ok(digest)
}

/// Recursively rebuild objects with their keys in sorted order.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
