//! In-memory collaborator implementations.
//!
//! Thread-safe reference implementations of the store traits, intended for
//! embedded use and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use crate::error::StorageError;

use super::audit::AuditEntry;
use super::traits::{AuditStore, Backup, BackupStore, MetricsSink};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Backups kept per container, newest first.
#[derive(Debug, Default)]
pub struct InMemoryBackupStore {
    by_container: RwLock<HashMap<String, Vec<Backup>>>,
}

impl InMemoryBackupStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackupStore for InMemoryBackupStore {
    fn get_backups(&self, container_id: &str) -> Result<Vec<Backup>, StorageError> {
        let guard = self.by_container.read().map_err(|_| lock_err("backups.read"))?;
        Ok(guard.get(container_id).cloned().unwrap_or_default())
    }

    fn insert_backup(&self, backup: Backup) -> Result<(), StorageError> {
        let mut guard = self.by_container.write().map_err(|_| lock_err("backups.write"))?;
        let list = guard.entry(backup.container_id.clone()).or_default();
        // Later inserts win ties on timestamp.
        list.insert(0, backup);
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(())
    }

    fn prune_old_backups(&self, container_id: &str, keep: usize) -> Result<usize, StorageError> {
        let mut guard = self.by_container.write().map_err(|_| lock_err("backups.prune"))?;
        let Some(list) = guard.get_mut(container_id) else {
            return Ok(0);
        };
        let removed = list.len().saturating_sub(keep);
        list.truncate(keep);
        Ok(removed)
    }
}

/// Audit entries kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry.
    ///
    /// # Errors
    ///
    /// Fails if the lock is poisoned.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, StorageError> {
        Ok(self.entries.read().map_err(|_| lock_err("audit.read"))?.clone())
    }

    /// Entries for one action.
    ///
    /// # Errors
    ///
    /// Fails if the lock is poisoned.
    pub fn by_action(&self, action: &str) -> Result<Vec<AuditEntry>, StorageError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.action == action)
            .collect())
    }
}

impl AuditStore for InMemoryAuditStore {
    fn insert_audit(&self, entry: AuditEntry) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|_| lock_err("audit.write"))?
            .push(entry);
        Ok(())
    }
}

/// Counters keyed by name and rendered label set.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl InMemoryMetrics {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter; 0 if never incremented.
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = counter_key(name, labels);
        self.counters
            .lock()
            .map_or(0, |c| c.get(&key).copied().unwrap_or(0))
    }
}

impl MetricsSink for InMemoryMetrics {
    fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = counter_key(name, labels);
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(key).or_insert(0) += 1;
        }
    }
}

/// `name{a="1",b="2"}` with labels sorted by key.
fn counter_key(name: &str, labels: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}
