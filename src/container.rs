//! Container snapshots and update classification.
//!
//! Containers are owned by the store; this crate reads them, classifies the
//! difference between the running image and the registry result, and exposes
//! their fields to templates through explicit accessor tables.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tag::{self, SemverDiff};

/// Image reference of a running container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImage {
    /// Registry name (`hub`, `ghcr`, ...).
    #[serde(default)]
    pub registry: String,
    /// Repository name without tag.
    pub name: String,
    /// Tag currently running.
    pub tag: String,
    /// Whether the running tag is treated as semver.
    #[serde(default)]
    pub tag_semver: bool,
    /// Digest currently running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Whether digest changes are watched.
    #[serde(default)]
    pub digest_watch: bool,
}

/// What the registry reported on the last watch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Kind of detected update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKindType {
    Tag,
    Digest,
    #[default]
    Unknown,
}

impl UpdateKindType {
    /// The lowercase label used in templates.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Digest => "digest",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UpdateKindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of the difference between local and remote image.
///
/// Recomputed every watch cycle and replaced wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKind {
    pub kind: UpdateKindType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_value: Option<String>,
    pub semver_diff: SemverDiff,
}

impl Default for UpdateKind {
    fn default() -> Self {
        Self::unknown()
    }
}

impl UpdateKind {
    /// No detectable update.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            kind: UpdateKindType::Unknown,
            local_value: None,
            remote_value: None,
            semver_diff: SemverDiff::Unknown,
        }
    }

    /// Classifies the container's running image against its registry result.
    ///
    /// Tags are passed through the container's transform formula before
    /// comparison. A semver tag only counts as an update when the remote tag
    /// is strictly newer; a non-semver tag counts whenever it differs.
    #[must_use]
    pub fn compute(container: &Container) -> Self {
        let Some(result) = &container.result else {
            return Self::unknown();
        };
        let image = &container.image;

        if let Some(remote_tag) = result.tag.as_deref() {
            if remote_tag != image.tag {
                if !image.tag_semver {
                    return Self {
                        kind: UpdateKindType::Tag,
                        local_value: Some(image.tag.clone()),
                        remote_value: Some(remote_tag.to_string()),
                        semver_diff: SemverDiff::Unknown,
                    };
                }

                let (local_t, remote_t) = match container.transform_tags.as_deref() {
                    Some(formula) => (
                        tag::transform(formula, &image.tag),
                        tag::transform(formula, remote_tag),
                    ),
                    None => (image.tag.clone(), remote_tag.to_string()),
                };
                let newer = tag::is_greater(&remote_t, &local_t) && !tag::is_greater(&local_t, &remote_t);
                if newer {
                    return Self {
                        kind: UpdateKindType::Tag,
                        local_value: Some(image.tag.clone()),
                        remote_value: Some(remote_tag.to_string()),
                        semver_diff: tag::diff(&local_t, &remote_t).unwrap_or(SemverDiff::Unknown),
                    };
                }
            }
        }

        if image.digest_watch {
            if let (Some(local), Some(remote)) = (image.digest.as_deref(), result.digest.as_deref()) {
                if local != remote {
                    return Self {
                        kind: UpdateKindType::Digest,
                        local_value: Some(local.to_string()),
                        remote_value: Some(remote.to_string()),
                        semver_diff: SemverDiff::Unknown,
                    };
                }
            }
        }

        Self::unknown()
    }
}

/// Per-container user policy for suppressing updates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    #[serde(default)]
    pub skip_tags: Vec<String>,
    #[serde(default)]
    pub skip_digests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snooze_until: Option<DateTime<Utc>>,
}

impl UpdatePolicy {
    /// True when the policy skips or snoozes this exact update at `now`.
    #[must_use]
    pub fn suppresses(&self, kind: &UpdateKind, now: DateTime<Utc>) -> bool {
        if self.snooze_until.is_some_and(|until| until > now) {
            return true;
        }
        let Some(remote) = kind.remote_value.as_deref() else {
            return false;
        };
        match kind.kind {
            UpdateKindType::Tag => self.skip_tags.iter().any(|t| t == remote),
            UpdateKindType::Digest => self.skip_digests.iter().any(|d| d == remote),
            UpdateKindType::Unknown => false,
        }
    }
}

/// A container snapshot as reported by a watcher.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub watcher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub image: ContainerImage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<UpdateResult>,
    #[serde(default)]
    pub update_kind: UpdateKind,
    #[serde(default)]
    pub update_available: bool,
    #[serde(default)]
    pub update_policy: UpdatePolicy,
    /// Formula applied to tags before comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_tags: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Container {
    /// Recomputes `update_kind` and `update_available` for this cycle.
    ///
    /// `update_available` holds only if the kind is known and the policy does
    /// not skip or snooze the exact remote value.
    pub fn refresh_update_state(&mut self, now: DateTime<Utc>) {
        let kind = UpdateKind::compute(self);
        self.update_available =
            kind.kind != UpdateKindType::Unknown && !self.update_policy.suppresses(&kind, now);
        self.update_kind = kind;
    }

    /// Full image reference (`name:tag`) of the running image.
    #[must_use]
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image.name, self.image.tag)
    }

    /// Looks up a single template-visible field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        lookup(CONTAINER_FIELDS, self, name)
    }

    /// Builds the template-visible view of this container.
    #[must_use]
    pub fn to_template_value(&self) -> Value {
        build(CONTAINER_FIELDS, self)
    }
}

type Getter<T> = fn(&T) -> Value;

fn opt_str(v: Option<&str>) -> Value {
    v.map_or(Value::Null, |s| Value::String(s.to_string()))
}

fn lookup<T>(table: &[(&str, Getter<T>)], record: &T, name: &str) -> Option<Value> {
    table
        .iter()
        .find(|(field, _)| *field == name)
        .map(|(_, get)| get(record))
}

fn build<T>(table: &[(&str, Getter<T>)], record: &T) -> Value {
    let mut map = Map::with_capacity(table.len());
    for (field, get) in table {
        map.insert((*field).to_string(), get(record));
    }
    Value::Object(map)
}

const CONTAINER_FIELDS: &[(&str, Getter<Container>)] = &[
    ("id", |c: &Container| Value::String(c.id.clone())),
    ("name", |c: &Container| Value::String(c.name.clone())),
    ("displayName", |c: &Container| {
        Value::String(c.display_name.clone().unwrap_or_else(|| c.name.clone()))
    }),
    ("watcher", |c: &Container| Value::String(c.watcher.clone())),
    ("status", |c: &Container| opt_str(c.status.as_deref())),
    ("image", |c: &Container| build(IMAGE_FIELDS, &c.image)),
    ("result", |c: &Container| c.result.as_ref().map_or(Value::Null, |r| build(RESULT_FIELDS, r))),
    ("updateKind", |c: &Container| build(UPDATE_KIND_FIELDS, &c.update_kind)),
    ("updateAvailable", |c: &Container| Value::Bool(c.update_available)),
    ("updatePolicy", |c: &Container| build(POLICY_FIELDS, &c.update_policy)),
    ("labels", |c: &Container| {
        Value::Object(
            c.labels
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }),
];

const IMAGE_FIELDS: &[(&str, Getter<ContainerImage>)] = &[
    ("registry", |i: &ContainerImage| Value::String(i.registry.clone())),
    ("name", |i: &ContainerImage| Value::String(i.name.clone())),
    ("tag", |i: &ContainerImage| {
        let mut tag = Map::new();
        tag.insert("value".to_string(), Value::String(i.tag.clone()));
        tag.insert("semver".to_string(), Value::Bool(i.tag_semver));
        Value::Object(tag)
    }),
    ("digest", |i: &ContainerImage| {
        let mut digest = Map::new();
        digest.insert("watch".to_string(), Value::Bool(i.digest_watch));
        digest.insert("value".to_string(), opt_str(i.digest.as_deref()));
        Value::Object(digest)
    }),
];

const RESULT_FIELDS: &[(&str, Getter<UpdateResult>)] = &[
    ("tag", |r: &UpdateResult| opt_str(r.tag.as_deref())),
    ("digest", |r: &UpdateResult| opt_str(r.digest.as_deref())),
    ("link", |r: &UpdateResult| opt_str(r.link.as_deref())),
];

const UPDATE_KIND_FIELDS: &[(&str, Getter<UpdateKind>)] = &[
    ("kind", |k: &UpdateKind| Value::String(k.kind.as_str().to_string())),
    ("localValue", |k: &UpdateKind| opt_str(k.local_value.as_deref())),
    ("remoteValue", |k: &UpdateKind| opt_str(k.remote_value.as_deref())),
    ("semverDiff", |k: &UpdateKind| Value::String(k.semver_diff.as_str().to_string())),
];

const POLICY_FIELDS: &[(&str, Getter<UpdatePolicy>)] = &[
    ("skipTags", |p: &UpdatePolicy| {
        Value::Array(p.skip_tags.iter().cloned().map(Value::String).collect())
    }),
    ("skipDigests", |p: &UpdatePolicy| {
        Value::Array(p.skip_digests.iter().cloned().map(Value::String).collect())
    }),
    ("snoozeUntil", |p: &UpdatePolicy| {
        p.snooze_until
            .map_or(Value::Null, |t| Value::String(t.to_rfc3339()))
    }),
];
