//! Collaborator contracts for backups, audit and metrics.

/// Audit entries and the channel-backed sink.
pub mod audit;
/// In-memory reference implementations.
pub mod memory;
/// Store traits.
pub mod traits;

pub use audit::{AuditEntry, AuditStatus, ChannelAuditStore};
pub use memory::{InMemoryAuditStore, InMemoryBackupStore, InMemoryMetrics};
pub use traits::{AuditStore, Backup, BackupStore, MetricsSink};
