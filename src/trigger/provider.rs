//! Trigger provider contract and the built-in provider variants.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::{Mode, TriggerInstanceConfig, TriggerSettings};
use crate::container::Container;
use crate::error::{TriggerError, ValidationError};
use crate::events::EventBus;
use crate::render::{render_batch, render_simple};
use crate::runtime::ContainerRuntime;
use crate::store::{AuditStore, BackupStore, MetricsSink};

use super::docker::DockerTrigger;
use super::log::LogTrigger;
use super::mask;

/// Rendered message handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Notification {
    /// Short title.
    pub title: String,
    /// Body text.
    pub body: String,
}

impl Notification {
    /// Renders the per-container templates of `settings`.
    #[must_use]
    pub fn simple(settings: &TriggerSettings, container: &Container) -> Self {
        Self {
            title: render_simple(&settings.simpletitle, container),
            body: render_simple(&settings.simplebody, container),
        }
    }

    /// Renders the batch title and one `- body` line per container.
    #[must_use]
    pub fn batch(settings: &TriggerSettings, containers: &[Container]) -> Self {
        let body = containers
            .iter()
            .map(|c| format!("- {}", render_simple(&settings.simplebody, c)))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            title: render_batch(&settings.batchtitle, containers),
            body,
        }
    }
}

/// A notification or action channel.
#[async_trait]
pub trait TriggerProvider: Send + Sync {
    /// Provider type name (`log`, `docker`).
    fn provider_type(&self) -> &str;

    /// Handles one container.
    async fn trigger(&self, container: &Container, notification: &Notification) -> Result<(), TriggerError>;

    /// Handles every eligible container of a cycle at once.
    ///
    /// Providers without a batch concept keep this default.
    async fn trigger_batch(
        &self,
        containers: &[Container],
        notification: &Notification,
    ) -> Result<(), TriggerError> {
        let _ = (containers, notification);
        Err(TriggerError::UnsupportedMode {
            provider: self.provider_type().to_string(),
            mode: Mode::Batch.as_str().to_string(),
        })
    }

    /// JSON description of the provider-specific keys.
    fn configuration_schema(&self) -> Value {
        json!({})
    }

    /// Configuration with secrets masked, for display.
    fn mask_configuration(&self, config: &Map<String, Value>) -> Map<String, Value> {
        mask::mask_configuration(config)
    }

    /// Whether concurrent calls are safe. Non-reentrant providers are
    /// serialized by the dispatcher.
    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Built-in provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Writes notifications to the log.
    Log,
    /// Updates containers in place.
    Docker,
}

impl ProviderKind {
    /// Every built-in variant.
    pub const ALL: [Self; 2] = [Self::Log, Self::Docker];

    /// Lower-case name, as used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Docker => "docker",
        }
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(name))
    }

    /// Names of every variant, for configuration resolution.
    #[must_use]
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.as_str()).collect()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborators a provider may need.
#[allow(missing_docs)]
#[derive(Clone)]
pub struct ProviderContext {
    pub bus: Arc<EventBus>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub backups: Arc<dyn BackupStore>,
    pub audit: Arc<dyn AuditStore>,
    pub metrics: Option<Arc<dyn MetricsSink>>,
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("bus", &self.bus)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Instantiates the provider for a resolved instance.
///
/// # Errors
///
/// Unknown provider names and invalid provider-specific settings.
pub fn build_provider(
    instance: &TriggerInstanceConfig,
    settings: &TriggerSettings,
    ctx: &ProviderContext,
) -> Result<Arc<dyn TriggerProvider>, ValidationError> {
    let kind = ProviderKind::from_name(&instance.provider).ok_or_else(|| {
        ValidationError::InvalidConfiguration {
            reason: format!("unknown trigger provider '{}'", instance.provider),
        }
    })?;
    let id = instance.id();
    let provider: Arc<dyn TriggerProvider> = match kind {
        ProviderKind::Log => Arc::new(LogTrigger::from_settings(&id, settings)?),
        ProviderKind::Docker => Arc::new(DockerTrigger::from_settings(&id, settings, ctx.clone())?),
    };
    Ok(provider)
}
