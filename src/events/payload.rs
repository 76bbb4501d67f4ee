//! Event payloads.

use serde::{Deserialize, Serialize};

use crate::container::Container;

/// Outcome of one container in one watch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerReport {
    /// Snapshot after the cycle.
    pub container: Container,
    /// True if the snapshot differs from the stored one.
    pub changed: bool,
}

impl ContainerReport {
    /// Report for `container`.
    #[must_use]
    pub fn new(container: Container, changed: bool) -> Self {
        Self { container, changed }
    }
}

/// A trigger finished updating a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApplied {
    /// Trigger that performed the update (`provider.name`).
    pub trigger: String,
    /// Container as it was before the update.
    pub container: Container,
}

/// A trigger failed while handling a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFailed {
    /// Trigger that failed (`provider.name`).
    pub trigger: String,
    /// Container the trigger was handling.
    pub container: Container,
    /// Rendered error message.
    pub error: String,
}

/// A watcher started or stopped a watch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherEvent {
    /// Watcher name.
    pub watcher: String,
}

/// The controller is about to update its own container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfUpdateEvent {
    /// Operation id shared with the UI.
    pub op_id: String,
    /// The controller's own container.
    pub container: Container,
}

/// Every event the bus carries, used for diagnostics.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ContainerAdded,
    ContainerUpdated,
    ContainerRemoved,
    WatcherStart,
    WatcherStop,
    SelfUpdateStarting,
    ContainerReport,
    ContainerReports,
    ContainerUpdateApplied,
    ContainerUpdateFailed,
}

impl EventKind {
    /// Wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContainerAdded => "container-added",
            Self::ContainerUpdated => "container-updated",
            Self::ContainerRemoved => "container-removed",
            Self::WatcherStart => "watcher-start",
            Self::WatcherStop => "watcher-stop",
            Self::SelfUpdateStarting => "self-update-starting",
            Self::ContainerReport => "container-report",
            Self::ContainerReports => "container-reports",
            Self::ContainerUpdateApplied => "container-update-applied",
            Self::ContainerUpdateFailed => "container-update-failed",
        }
    }

    /// True for the sequential, awaited families.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(
            self,
            Self::ContainerReport
                | Self::ContainerReports
                | Self::ContainerUpdateApplied
                | Self::ContainerUpdateFailed
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
