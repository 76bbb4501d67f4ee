//! Collaborator storage contracts.
//!
//! The engine never owns persistence. Backups, audit entries and metrics are
//! delegated to these traits; in-memory implementations live in
//! [`crate::store::memory`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::container::Container;
use crate::error::StorageError;

use super::audit::AuditEntry;

/// A previously running image kept so a container can be rolled back.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub container_id: String,
    pub container_name: String,
    pub image_name: String,
    pub image_tag: String,
    pub trigger_name: String,
}

impl Backup {
    /// Captures the image `container` currently runs.
    #[must_use]
    pub fn of(container: &Container, trigger_name: impl Into<String>) -> Self {
        let image_name = if container.image.registry.is_empty() {
            container.image.name.clone()
        } else {
            format!("{}/{}", container.image.registry, container.image.name)
        };
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            container_id: container.id.clone(),
            container_name: container.name.clone(),
            image_name,
            image_tag: container.image.tag.clone(),
            trigger_name: trigger_name.into(),
        }
    }

    /// `name:tag` reference of the backed-up image.
    #[must_use]
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image_name, self.image_tag)
    }
}

/// Backup storage contract.
pub trait BackupStore: Send + Sync {
    /// Backups for a container, newest first.
    fn get_backups(&self, container_id: &str) -> Result<Vec<Backup>, StorageError>;

    /// Stores a backup.
    fn insert_backup(&self, backup: Backup) -> Result<(), StorageError>;

    /// Keeps only the `keep` newest backups of a container. Returns how many were removed.
    fn prune_old_backups(&self, container_id: &str, keep: usize) -> Result<usize, StorageError>;

    /// The newest backup, if any.
    fn latest_backup(&self, container_id: &str) -> Result<Option<Backup>, StorageError> {
        Ok(self.get_backups(container_id)?.into_iter().next())
    }
}

/// Audit log contract. Inserts are fire-and-forget from the engine's side.
pub trait AuditStore: Send + Sync {
    /// Records an entry.
    fn insert_audit(&self, entry: AuditEntry) -> Result<(), StorageError>;
}

/// Optional counter sink.
pub trait MetricsSink: Send + Sync {
    /// Increments counter `name` for the given label set.
    fn inc_counter(&self, name: &str, labels: &[(&str, &str)]);
}
