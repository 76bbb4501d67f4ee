//! Trigger configuration: loading, resolution and typed settings.

/// Raw tree loading from JSON and environment variables.
pub mod env;
/// Shared-setting resolution across providers and groups.
pub mod resolver;
/// Typed per-instance settings.
pub mod settings;

pub use env::RawConfig;
pub use resolver::{resolve, resolve_typed, TriggerInstanceConfig, SHARED_KEYS};
pub use settings::{Mode, Threshold, TriggerSettings, COMMON_KEYS};

/// Dispatcher runtime knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Most `(trigger, container)` pairs remembered for `once`.
    ///
    /// When exceeded the oldest entries are forgotten, which may cause one
    /// repeated notification for them.
    pub once_memory_limit: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            once_memory_limit: 10_000,
        }
    }
}
