//! Loading the raw configuration tree.
//!
//! The raw tree is `provider -> triggerName -> settings`, plus optional
//! top-level trigger groups. Keys are lower-cased on load.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ValidationError;

/// Unresolved trigger configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawConfig {
    tree: Map<String, Value>,
}

impl RawConfig {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON object, lower-casing every key.
    ///
    /// # Errors
    ///
    /// Fails if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match lowercase_keys(value) {
            Value::Object(tree) => Ok(Self { tree }),
            other => Err(ValidationError::InvalidConfiguration {
                reason: format!("expected an object at the root, got {}", kind_name(&other)),
            }),
        }
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or a non-object root.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfiguration {
                reason: format!("malformed JSON: {e}"),
            })?;
        Self::from_value(value)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not hold a JSON object.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfiguration {
                reason: format!("cannot read {}: {e}", path.display()),
            })?;
        Self::from_json_str(&text)
    }

    /// Folds `<PREFIX>_<A>_<B>[_<C>...]=value` variables into a tree.
    ///
    /// The prefix match is case-insensitive. Each `_`-separated segment after
    /// the prefix becomes one lower-cased nesting level, so
    /// `DW_TRIGGER_SLACK_OPS_THRESHOLD=minor` yields
    /// `{"slack": {"ops": {"threshold": "minor"}}}` and
    /// `DW_TRIGGER_OPS_ORDER=5` yields `{"ops": {"order": "5"}}`. Variables
    /// with fewer than two segments are ignored. Values stay strings.
    pub fn from_env_vars<I, K, V>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let wanted = format!("{}_", prefix.trim_end_matches('_').to_ascii_uppercase());
        let mut matching: Vec<(String, String)> = vars
            .into_iter()
            .filter_map(|(k, v)| {
                let upper = k.as_ref().to_ascii_uppercase();
                let rest = upper.strip_prefix(&wanted)?;
                Some((rest.to_ascii_lowercase(), v.into()))
            })
            .collect();
        // Deterministic regardless of environment iteration order.
        matching.sort();

        let mut tree = Map::new();
        for (path, value) in matching {
            let segments: Vec<&str> = path.split('_').filter(|s| !s.is_empty()).collect();
            if segments.len() < 2 {
                debug!(variable = %path, "ignoring configuration variable without a setting key");
                continue;
            }
            if !insert_path(&mut tree, &segments, Value::String(value)) {
                debug!(variable = %path, "ignoring configuration variable that conflicts with a scalar");
            }
        }
        Self { tree }
    }

    /// [`RawConfig::from_env_vars`] over the process environment.
    #[must_use]
    pub fn from_env(prefix: &str) -> Self {
        Self::from_env_vars(prefix, std::env::vars())
    }

    /// Deep-merges `other` over `self`; `other` wins on scalar conflicts.
    #[must_use]
    pub fn merged_with(mut self, other: Self) -> Self {
        merge_into(&mut self.tree, other.tree);
        self
    }

    /// The tree.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.tree
    }

    /// True when nothing is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Inserts `value` at `segments`, creating objects on the way.
///
/// Returns false if an existing scalar sits on the path.
fn insert_path(tree: &mut Map<String, Value>, segments: &[&str], value: Value) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let mut node = tree;
    for segment in parents {
        let entry = node
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(next) = entry else {
            return false;
        };
        node = next;
    }
    if matches!(node.get(*last), Some(Value::Object(_))) {
        return false;
    }
    node.insert((*last).to_string(), value);
    true
}

fn merge_into(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge_into(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), lowercase_keys(v)))
                .collect(),
        ),
        other => other,
    }
}

const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn env_vars_fold_into_nested_tree() {
        let raw = RawConfig::from_env_vars(
            "DW_TRIGGER",
            vec![
                ("DW_TRIGGER_SLACK_OPS_THRESHOLD", "minor"),
                ("dw_trigger_slack_ops_url", "https://hooks"),
                ("DW_TRIGGER_OPS_ORDER", "5"),
                ("DW_TRIGGER_LONE", "ignored"),
                ("OTHER_SLACK_OPS_URL", "ignored"),
            ],
        );
        assert_eq!(
            Value::Object(raw.as_map().clone()),
            json!({
                "slack": {"ops": {"threshold": "minor", "url": "https://hooks"}},
                "ops": {"order": "5"},
            })
        );
    }

    #[test]
    fn scalar_conflicts_are_skipped() {
        let raw = RawConfig::from_env_vars(
            "DW",
            vec![("DW_SLACK_OPS", "scalar"), ("DW_SLACK_OPS_URL", "nested")],
        );
        assert_eq!(raw.as_map()["slack"]["ops"], json!("scalar"));
    }

    #[test]
    fn json_sources_lowercase_keys_and_reject_non_objects() {
        let raw = RawConfig::from_json_str(r#"{"Slack": {"OPS": {"Threshold": "major"}}}"#).unwrap();
        assert_eq!(raw.as_map()["slack"]["ops"]["threshold"], json!("major"));
        assert!(RawConfig::from_json_str("[1, 2]").is_err());
        assert!(RawConfig::from_json_str("{").is_err());
        assert!(RawConfig::from_json_file("/definitely/not/here.json").is_err());
    }

    #[test]
    fn merge_prefers_overlay() {
        let file = RawConfig::from_value(json!({"slack": {"ops": {"threshold": "major", "url": "a"}}})).unwrap();
        let env = RawConfig::from_value(json!({"slack": {"ops": {"threshold": "minor"}}})).unwrap();
        let merged = file.merged_with(env);
        assert_eq!(merged.as_map()["slack"]["ops"]["threshold"], json!("minor"));
        assert_eq!(merged.as_map()["slack"]["ops"]["url"], json!("a"));
    }
}
