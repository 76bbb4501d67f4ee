//! Two-pass resolution of shared trigger settings.
//!
//! Input is a [`RawConfig`] tree. Output is one flat settings map per trigger
//! instance, merged with this precedence (highest first):
//!
//! 1. keys set on the instance itself;
//! 2. trigger-group defaults (a top-level, non-provider key whose object holds
//!    only shared keys), matched by instance name case-insensitively;
//! 3. values inferred across providers for a trigger name that appears under
//!    several providers, when every explicit occurrence agrees;
//! 4. provider-level shared keys set next to the provider's triggers.
//!
//! A top-level key that matches a provider name is always a provider, even if
//! its object looks like a group.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ValidationError;

use super::env::RawConfig;
use super::settings::TriggerSettings;

/// Keys that may be inherited from providers, groups and other providers.
pub const SHARED_KEYS: &[&str] = &["threshold", "once", "mode", "order"];

fn is_shared_key(key: &str) -> bool {
    SHARED_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_) | Value::Null)
}

/// Fully resolved configuration of one trigger instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInstanceConfig {
    /// Provider type, lower-case (`slack`, `docker`).
    pub provider: String,
    /// Instance name, lower-case.
    pub name: String,
    /// Merged settings.
    pub settings: Map<String, Value>,
}

impl TriggerInstanceConfig {
    /// `provider.name`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}.{}", self.provider, self.name)
    }

    /// Typed view of the merged settings.
    ///
    /// # Errors
    ///
    /// Fails on invalid values for the common keys.
    pub fn typed(&self) -> Result<TriggerSettings, ValidationError> {
        TriggerSettings::from_map(&self.id(), &self.settings)
    }
}

#[derive(Debug, Default)]
struct Classified {
    /// provider -> shared defaults
    provider_defaults: BTreeMap<String, Map<String, Value>>,
    /// (provider, name) -> explicit settings
    instances: BTreeMap<(String, String), Map<String, Value>>,
    /// group name -> defaults
    groups: HashMap<String, Map<String, Value>>,
}

/// Resolves `raw` into per-instance settings, sorted by `(provider, name)`.
///
/// `providers` lists the recognised provider names; matching is
/// case-insensitive. The result does not depend on key order in `raw`.
#[must_use]
pub fn resolve(raw: &RawConfig, providers: &[&str]) -> Vec<TriggerInstanceConfig> {
    let providers: BTreeSet<String> = providers.iter().map(|p| p.to_ascii_lowercase()).collect();
    let classified = classify(raw.as_map(), &providers);
    let inferred = infer_cross_provider(&classified.instances);

    classified
        .instances
        .iter()
        .map(|((provider, name), explicit)| {
            let mut settings = classified
                .provider_defaults
                .get(provider)
                .cloned()
                .unwrap_or_default();
            let layers = [inferred.get(name), classified.groups.get(name), Some(explicit)];
            for layer in layers.into_iter().flatten() {
                for (key, value) in layer {
                    settings.insert(key.clone(), value.clone());
                }
            }
            TriggerInstanceConfig {
                provider: provider.clone(),
                name: name.clone(),
                settings,
            }
        })
        .collect()
}

/// Resolves and type-checks every instance.
///
/// # Errors
///
/// The first instance whose common settings are invalid.
pub fn resolve_typed(
    raw: &RawConfig,
    providers: &[&str],
) -> Result<Vec<(TriggerInstanceConfig, TriggerSettings)>, ValidationError> {
    resolve(raw, providers)
        .into_iter()
        .map(|instance| {
            let typed = instance.typed()?;
            Ok((instance, typed))
        })
        .collect()
}

/// Pass A: sort top-level keys into providers and groups.
fn classify(tree: &Map<String, Value>, providers: &BTreeSet<String>) -> Classified {
    let mut out = Classified::default();

    for (raw_key, value) in tree {
        let key = raw_key.to_ascii_lowercase();
        let Value::Object(entries) = value else {
            debug!(key = %key, "ignoring non-object top-level configuration key");
            continue;
        };

        if providers.contains(&key) {
            let mut defaults = Map::new();
            for (entry_key, entry) in entries {
                let entry_key = entry_key.to_ascii_lowercase();
                match entry {
                    Value::Object(settings) => {
                        let settings = settings
                            .iter()
                            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                            .collect();
                        out.instances.insert((key.clone(), entry_key), settings);
                    }
                    v if is_shared_key(&entry_key) && is_scalar(v) => {
                        defaults.insert(entry_key, v.clone());
                    }
                    _ => {
                        debug!(provider = %key, key = %entry_key, "ignoring provider-level key");
                    }
                }
            }
            if !defaults.is_empty() {
                out.provider_defaults.insert(key, defaults);
            }
            continue;
        }

        let is_group = !entries.is_empty()
            && entries
                .iter()
                .all(|(k, v)| is_shared_key(k) && is_scalar(v));
        if is_group {
            let defaults = entries
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect();
            out.groups.insert(key, defaults);
        } else {
            debug!(key = %key, "ignoring top-level key that is neither a provider nor a trigger group");
        }
    }

    out
}

/// Pass B: shared values agreed on by every explicit occurrence of a trigger
/// name across providers.
fn infer_cross_provider(
    instances: &BTreeMap<(String, String), Map<String, Value>>,
) -> HashMap<String, Map<String, Value>> {
    let mut by_name: BTreeMap<&str, Vec<&Map<String, Value>>> = BTreeMap::new();
    for ((_, name), settings) in instances {
        by_name.entry(name.as_str()).or_default().push(settings);
    }

    let mut inferred = HashMap::new();
    for (name, occurrences) in by_name {
        if occurrences.len() < 2 {
            continue;
        }
        let mut defaults = Map::new();
        for key in SHARED_KEYS {
            let mut distinct: Vec<&Value> = Vec::new();
            for settings in &occurrences {
                if let Some(v) = settings.get(*key).filter(|v| is_scalar(v)) {
                    if !distinct.contains(&v) {
                        distinct.push(v);
                    }
                }
            }
            match distinct.as_slice() {
                [] => {}
                [single] => {
                    defaults.insert((*key).to_string(), (*single).clone());
                }
                _ => warn!(
                    trigger = %name,
                    key = %key,
                    values = distinct.len(),
                    "conflicting values across providers; not inferring a shared default"
                ),
            }
        }
        if !defaults.is_empty() {
            inferred.insert(name.to_string(), defaults);
        }
    }
    inferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROVIDERS: &[&str] = &["slack", "smtp", "docker", "log"];

    fn raw(v: Value) -> RawConfig {
        RawConfig::from_value(v).unwrap()
    }

    fn find<'a>(all: &'a [TriggerInstanceConfig], id: &str) -> &'a TriggerInstanceConfig {
        all.iter().find(|t| t.id() == id).unwrap()
    }

    #[test]
    fn provider_defaults_apply_and_explicit_wins() {
        let all = resolve(
            &raw(json!({
                "slack": {
                    "threshold": "minor",
                    "ops": {"url": "a"},
                    "dev": {"url": "b", "threshold": "all"},
                }
            })),
            PROVIDERS,
        );
        assert_eq!(all.len(), 2);
        assert_eq!(find(&all, "slack.ops").settings["threshold"], json!("minor"));
        assert_eq!(find(&all, "slack.dev").settings["threshold"], json!("all"));
    }

    #[test]
    fn groups_apply_across_providers_case_insensitively() {
        let all = resolve(
            &raw(json!({
                "OPS": {"threshold": "major", "order": 5},
                "slack": {"ops": {"url": "a"}},
                "smtp": {"Ops": {"to": "x@example.com", "order": 1}},
            })),
            PROVIDERS,
        );
        assert_eq!(find(&all, "slack.ops").settings["threshold"], json!("major"));
        assert_eq!(find(&all, "slack.ops").settings["order"], json!(5));
        assert_eq!(find(&all, "smtp.ops").settings["order"], json!(1));
    }

    #[test]
    fn group_beats_provider_default() {
        let all = resolve(
            &raw(json!({
                "ops": {"threshold": "major"},
                "slack": {"threshold": "patch", "ops": {}},
            })),
            PROVIDERS,
        );
        assert_eq!(find(&all, "slack.ops").settings["threshold"], json!("major"));
    }

    #[test]
    fn cross_provider_inference_needs_agreement() {
        let agreed = resolve(
            &raw(json!({
                "slack": {"ops": {"mode": "batch"}},
                "smtp": {"ops": {}},
            })),
            PROVIDERS,
        );
        assert_eq!(find(&agreed, "smtp.ops").settings["mode"], json!("batch"));

        let ambiguous = resolve(
            &raw(json!({
                "slack": {"ops": {"mode": "batch"}},
                "smtp": {"ops": {"mode": "simple"}},
                "log": {"ops": {}},
            })),
            PROVIDERS,
        );
        assert!(find(&ambiguous, "log.ops").settings.get("mode").is_none());
    }

    #[test]
    fn provider_name_wins_classification() {
        let all = resolve(&raw(json!({"docker": {"threshold": "major"}})), PROVIDERS);
        assert!(all.is_empty());

        let all = resolve(
            &raw(json!({
                "docker": {"threshold": "major"},
                "slack": {"docker": {}},
            })),
            PROVIDERS,
        );
        assert!(find(&all, "slack.docker").settings.get("threshold").is_none());
    }

    #[test]
    fn non_group_top_level_objects_are_ignored() {
        let all = resolve(
            &raw(json!({
                "misc": {"threshold": "major", "url": "x"},
                "slack": {"misc": {}},
            })),
            PROVIDERS,
        );
        assert!(find(&all, "slack.misc").settings.is_empty());
    }

    #[test]
    fn output_is_sorted_and_typed() {
        let all = resolve_typed(
            &raw(json!({
                "smtp": {"b": {"order": "3"}},
                "log": {"z": {}, "a": {"once": "false"}},
            })),
            PROVIDERS,
        )
        .unwrap();
        let ids: Vec<String> = all.iter().map(|(i, _)| i.id()).collect();
        assert_eq!(ids, vec!["log.a", "log.z", "smtp.b"]);
        assert!(!all[0].1.once);
        assert_eq!(all[2].1.order, 3);
    }
}
