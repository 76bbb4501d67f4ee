//! Audit entries and a non-blocking channel sink.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

use super::traits::AuditStore;

/// Outcome recorded by an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// The action succeeded.
    Success,
    /// The action failed.
    Error,
    /// Informational.
    Info,
}

/// One audit log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique id.
    pub id: Uuid,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Action name, e.g. `auto-rollback`.
    pub action: String,
    /// Container the action concerns.
    pub container_name: String,
    /// Image reference, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    /// Version before the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    /// Version after the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<String>,
    /// Outcome.
    pub status: AuditStatus,
    /// Free-form details (error text for failures).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AuditEntry {
    /// A new entry stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(action: impl Into<String>, container_name: impl Into<String>, status: AuditStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: action.into(),
            container_name: container_name.into(),
            container_image: None,
            from_version: None,
            to_version: None,
            status,
            details: None,
        }
    }

    /// Sets the image reference.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.container_image = Some(image.into());
        self
    }

    /// Sets the from/to versions.
    #[must_use]
    pub fn with_versions(mut self, from: Option<String>, to: Option<String>) -> Self {
        self.from_version = from;
        self.to_version = to;
        self
    }

    /// Sets details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Audit sink backed by a bounded channel.
///
/// `insert_audit` never blocks: when the channel is full or the receiver is
/// gone the entry is dropped and counted.
#[derive(Debug)]
pub struct ChannelAuditStore {
    tx: Sender<AuditEntry>,
    rx: Receiver<AuditEntry>,
    dropped: AtomicU64,
}

impl ChannelAuditStore {
    /// Creates a sink holding at most `capacity` undrained entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Receiver side, for a consumer that persists entries.
    #[must_use]
    pub fn receiver(&self) -> Receiver<AuditEntry> {
        self.rx.clone()
    }

    /// Drains everything currently queued.
    #[must_use]
    pub fn drain(&self) -> Vec<AuditEntry> {
        self.rx.try_iter().collect()
    }

    /// Entries dropped because the channel was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditStore for ChannelAuditStore {
    fn insert_audit(&self, entry: AuditEntry) -> Result<(), StorageError> {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
