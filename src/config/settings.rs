//! Typed view of one resolved trigger instance.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::events::DEFAULT_ORDER;
use crate::render::{DEFAULT_BATCH_TITLE, DEFAULT_SIMPLE_BODY, DEFAULT_SIMPLE_TITLE};

/// Minimum update severity a trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Threshold {
    /// Every update, including tag changes of unknown severity.
    #[default]
    All,
    /// Digest changes and anything more severe.
    Digest,
    /// Prerelease changes and anything more severe.
    Prerelease,
    /// Patch, minor and major.
    Patch,
    /// Minor and major.
    Minor,
    /// Major only.
    Major,
}

impl Threshold {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Digest => "digest",
            Self::Prerelease => "prerelease",
            Self::Patch => "patch",
            Self::Minor => "minor",
            Self::Major => "major",
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Threshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "digest" => Ok(Self::Digest),
            "prerelease" => Ok(Self::Prerelease),
            "patch" => Ok(Self::Patch),
            "minor" => Ok(Self::Minor),
            "major" => Ok(Self::Major),
            other => Err(format!("unknown threshold '{other}'")),
        }
    }
}

/// Invocation style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One provider call per container.
    #[default]
    Simple,
    /// One provider call per cycle with every eligible container.
    Batch,
}

impl Mode {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "batch" => Ok(Self::Batch),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Keys consumed by [`TriggerSettings`]; everything else is provider-specific.
pub const COMMON_KEYS: &[&str] = &[
    "threshold",
    "once",
    "mode",
    "order",
    "auto",
    "simpletitle",
    "simplebody",
    "batchtitle",
];

/// Resolved settings shared by every provider.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub threshold: Threshold,
    pub once: bool,
    pub mode: Mode,
    pub order: i64,
    /// When false the trigger only runs on explicit request.
    pub auto: bool,
    pub simpletitle: String,
    pub simplebody: String,
    pub batchtitle: String,
    /// Provider-specific keys, untouched.
    pub extra: Map<String, Value>,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            threshold: Threshold::All,
            once: true,
            mode: Mode::Simple,
            order: DEFAULT_ORDER,
            auto: true,
            simpletitle: DEFAULT_SIMPLE_TITLE.to_string(),
            simplebody: DEFAULT_SIMPLE_BODY.to_string(),
            batchtitle: DEFAULT_BATCH_TITLE.to_string(),
            extra: Map::new(),
        }
    }
}

impl TriggerSettings {
    /// Builds settings from a resolved key/value map.
    ///
    /// Keys are matched case-insensitively. Strings are accepted for every
    /// typed key (`"true"`, `"42"`) since environment values arrive that way.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidSetting` naming the first bad key.
    pub fn from_map(trigger: &str, map: &Map<String, Value>) -> Result<Self, ValidationError> {
        let invalid = |key: &str, reason: String| ValidationError::InvalidSetting {
            trigger: trigger.to_string(),
            key: key.to_string(),
            reason,
        };

        let mut settings = Self::default();
        for (raw_key, value) in map {
            let key = raw_key.to_ascii_lowercase();
            match key.as_str() {
                "threshold" => {
                    settings.threshold = scalar_text(value)
                        .ok_or_else(|| invalid(&key, "expected a string".into()))?
                        .parse()
                        .map_err(|e| invalid(&key, e))?;
                }
                "mode" => {
                    settings.mode = scalar_text(value)
                        .ok_or_else(|| invalid(&key, "expected a string".into()))?
                        .parse()
                        .map_err(|e| invalid(&key, e))?;
                }
                "once" => settings.once = coerce_bool(value).map_err(|e| invalid(&key, e))?,
                "auto" => settings.auto = coerce_bool(value).map_err(|e| invalid(&key, e))?,
                "order" => settings.order = coerce_i64(value).map_err(|e| invalid(&key, e))?,
                "simpletitle" | "simplebody" | "batchtitle" => {
                    let text = scalar_text(value)
                        .ok_or_else(|| invalid(&key, "expected a string".into()))?;
                    match key.as_str() {
                        "simpletitle" => settings.simpletitle = text,
                        "simplebody" => settings.simplebody = text,
                        _ => settings.batchtitle = text,
                    }
                }
                _ => {
                    settings.extra.insert(key, value.clone());
                }
            }
        }
        Ok(settings)
    }

    /// Provider-specific string value.
    #[must_use]
    pub fn extra_str(&self, key: &str) -> Option<String> {
        self.extra.get(key).and_then(scalar_text)
    }

    /// Provider-specific boolean, coerced from strings.
    ///
    /// # Errors
    ///
    /// Fails when the value is present but not boolean-like.
    pub fn extra_bool(&self, key: &str) -> Result<Option<bool>, String> {
        self.extra.get(key).map(coerce_bool).transpose()
    }

    /// Provider-specific integer, coerced from strings.
    ///
    /// # Errors
    ///
    /// Fails when the value is present but not an integer.
    pub fn extra_i64(&self, key: &str) -> Result<Option<i64>, String> {
        self.extra.get(key).map(coerce_i64).transpose()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn coerce_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(format!("expected a boolean, got '{other}'")),
        },
        other => Err(format!("expected a boolean, got {other}")),
    }
}

pub(crate) fn coerce_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("expected an integer, got {n}")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("expected an integer, got '{s}'")),
        other => Err(format!("expected an integer, got {other}")),
    }
}
