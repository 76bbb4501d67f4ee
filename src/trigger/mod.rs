//! Triggers: provider contract, built-in providers and the dispatcher.

/// Per-cycle dispatch.
pub mod dispatcher;
/// Update-in-place provider.
pub mod docker;
/// Logging provider.
pub mod log;
/// Secret masking for configuration display.
pub mod mask;
/// Provider contract and registry.
pub mod provider;
/// Severity threshold filtering.
pub mod threshold;

pub use dispatcher::{DispatchReport, RegisteredTrigger, SkipReason, TriggerDispatcher, TriggerOutcome};
pub use docker::{DockerOptions, DockerTrigger};
pub use log::{LogLevel, LogTrigger};
pub use provider::{build_provider, Notification, ProviderContext, ProviderKind, TriggerProvider};
