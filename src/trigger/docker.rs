//! Docker provider: updates containers in place.
//!
//! For each container: pull the new image, back up the running one, stop and
//! remove the container, recreate it from the new image, prune old backups,
//! then emit `container-update-applied`. With `autorollback` enabled a health
//! monitor watches the recreated container.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::TriggerSettings;
use crate::container::{Container, UpdateKindType};
use crate::error::{TriggerError, ValidationError};
use crate::events::UpdateApplied;
use crate::health::{start_health_monitor, HealthMonitorConfig, HealthMonitorHandle, HealthMonitorOptions};
use crate::store::{AuditEntry, AuditStatus, Backup};

use super::provider::{Notification, ProviderContext, ProviderKind, TriggerProvider};

/// Audit action recorded for applied updates.
pub const UPDATE_ACTION: &str = "update-applied";

/// Provider-specific settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerOptions {
    /// Backups kept per container.
    pub backup_count: usize,
    /// Start a health monitor after each recreate.
    pub auto_rollback: bool,
    /// Health monitor timings.
    pub rollback: HealthMonitorConfig,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            backup_count: 3,
            auto_rollback: false,
            rollback: HealthMonitorConfig::default(),
        }
    }
}

impl DockerOptions {
    /// Reads `backupcount`, `autorollback`, `rollbackwindow` and
    /// `rollbackinterval` (milliseconds).
    ///
    /// # Errors
    ///
    /// Malformed values and invalid monitor timings when rollback is enabled.
    pub fn from_settings(trigger: &str, settings: &TriggerSettings) -> Result<Self, ValidationError> {
        let invalid = |key: &str, reason: String| ValidationError::InvalidSetting {
            trigger: trigger.to_string(),
            key: key.to_string(),
            reason,
        };
        let millis = |key: &str, default: Duration| -> Result<Duration, ValidationError> {
            match settings.extra_i64(key).map_err(|e| invalid(key, e))? {
                None => Ok(default),
                Some(ms) => u64::try_from(ms)
                    .map(Duration::from_millis)
                    .map_err(|_| invalid(key, format!("expected a non-negative duration, got {ms}"))),
            }
        };

        let mut options = Self::default();
        if let Some(count) = settings.extra_i64("backupcount").map_err(|e| invalid("backupcount", e))? {
            options.backup_count = usize::try_from(count)
                .map_err(|_| invalid("backupcount", format!("expected a non-negative count, got {count}")))?;
        }
        if let Some(enabled) = settings.extra_bool("autorollback").map_err(|e| invalid("autorollback", e))? {
            options.auto_rollback = enabled;
        }
        options.rollback = HealthMonitorConfig {
            window: millis("rollbackwindow", options.rollback.window)?,
            interval: millis("rollbackinterval", options.rollback.interval)?,
        };
        if options.auto_rollback {
            options.rollback.validate()?;
        }
        Ok(options)
    }
}

/// Updates containers in place through the runtime collaborator.
pub struct DockerTrigger {
    id: String,
    options: DockerOptions,
    ctx: ProviderContext,
    monitors: Mutex<HashMap<String, HealthMonitorHandle>>,
}

impl std::fmt::Debug for DockerTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerTrigger")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DockerTrigger {
    /// A trigger named `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, options: DockerOptions, ctx: ProviderContext) -> Self {
        Self {
            id: id.into(),
            options,
            ctx,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Builds from resolved settings.
    ///
    /// # Errors
    ///
    /// See [`DockerOptions::from_settings`].
    pub fn from_settings(id: &str, settings: &TriggerSettings, ctx: ProviderContext) -> Result<Self, ValidationError> {
        Ok(Self::new(id, DockerOptions::from_settings(id, settings)?, ctx))
    }

    /// Configured options.
    #[must_use]
    pub const fn options(&self) -> &DockerOptions {
        &self.options
    }

    /// Health monitor currently attached to a container, by name.
    #[must_use]
    pub fn monitor(&self, container_name: &str) -> Option<HealthMonitorHandle> {
        self.lock_monitors().get(container_name).cloned()
    }

    /// Image reference the container should run after the update.
    ///
    /// Tag updates move to the remote tag; digest updates re-pull the current tag.
    #[must_use]
    pub fn target_image(container: &Container) -> String {
        let tag = match (container.update_kind.kind, container.update_kind.remote_value.as_deref()) {
            (UpdateKindType::Tag, Some(remote)) => remote,
            _ => container.image.tag.as_str(),
        };
        let name = if container.image.registry.is_empty() {
            container.image.name.clone()
        } else {
            format!("{}/{}", container.image.registry, container.image.name)
        };
        format!("{name}:{tag}")
    }

    fn lock_monitors(&self) -> MutexGuard<'_, HashMap<String, HealthMonitorHandle>> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.ctx.audit.insert_audit(entry) {
            warn!(trigger = %self.id, error = %e, "failed to record audit entry");
        }
    }

    fn watch(&self, container: &Container, new_id: String) -> Result<(), TriggerError> {
        let handle = start_health_monitor(HealthMonitorOptions {
            container_id: new_id,
            container: container.clone(),
            config: self.options.rollback,
            runtime: self.ctx.runtime.clone(),
            backups: self.ctx.backups.clone(),
            audit: self.ctx.audit.clone(),
            metrics: self.ctx.metrics.clone(),
        })
        .map_err(|e| TriggerError::Provider {
            trigger: self.id.clone(),
            message: e.to_string(),
        })?;
        if let Some(previous) = self.lock_monitors().insert(container.name.clone(), handle) {
            previous.cancel();
        }
        Ok(())
    }
}

#[async_trait]
impl TriggerProvider for DockerTrigger {
    fn provider_type(&self) -> &str {
        ProviderKind::Docker.as_str()
    }

    async fn trigger(&self, container: &Container, _notification: &Notification) -> Result<(), TriggerError> {
        let image = Self::target_image(container);
        info!(trigger = %self.id, container = %container.name, image = %image, "updating container");

        self.ctx.runtime.pull_image(&image).await?;

        let backup = Backup::of(container, self.id.clone());
        let from = backup.image_tag.clone();
        self.ctx.backups.insert_backup(backup)?;

        // A previous monitor would otherwise roll back the container we are replacing.
        if let Some(previous) = self.lock_monitors().remove(&container.name) {
            previous.cancel();
        }

        self.ctx.runtime.stop_and_remove(&container.id).await?;
        let new_id = self.ctx.runtime.recreate(container, &image).await?;

        let pruned = self
            .ctx
            .backups
            .prune_old_backups(&container.id, self.options.backup_count)?;
        if pruned > 0 {
            debug!(trigger = %self.id, container = %container.name, pruned, "pruned old backups");
        }

        self.record(
            AuditEntry::new(UPDATE_ACTION, container.name.clone(), AuditStatus::Success)
                .with_image(image.clone())
                .with_versions(Some(from), container.update_kind.remote_value.clone()),
        );

        // The container already runs the new image: the monitor must start
        // and handler failures must not turn the update into a failure.
        if self.options.auto_rollback {
            self.watch(container, new_id)?;
        }

        if let Err(e) = self
            .ctx
            .bus
            .emit_container_update_applied(UpdateApplied {
                trigger: self.id.clone(),
                container: container.clone(),
            })
            .await
        {
            warn!(
                trigger = %self.id,
                container = %container.name,
                error = %e,
                "update applied but a container-update-applied handler failed"
            );
        }
        Ok(())
    }

    fn configuration_schema(&self) -> Value {
        json!({
            "backupcount": {"type": "integer", "minimum": 0, "default": 3},
            "autorollback": {"type": "boolean", "default": false},
            "rollbackwindow": {"type": "integer", "minimum": 1, "default": 300_000},
            "rollbackinterval": {"type": "integer", "minimum": 1, "default": 10_000},
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::Map;

    use crate::events::{EventBus, HandlerOptions};
    use crate::runtime::{ContainerInspection, HealthStatus, InMemoryRuntime};
    use crate::store::{BackupStore, InMemoryAuditStore, InMemoryBackupStore};
    use crate::container::UpdateKind;
    use crate::tag::SemverDiff;

    fn settings(extra: Value) -> TriggerSettings {
        let Value::Object(extra) = extra else { unreachable!() };
        TriggerSettings {
            extra,
            ..TriggerSettings::default()
        }
    }

    fn container() -> Container {
        let mut c = Container {
            id: "c1".into(),
            name: "web".into(),
            update_available: true,
            ..Container::default()
        };
        c.image.name = "library/nginx".into();
        c.image.registry = "docker.io".into();
        c.image.tag = "1.25".into();
        c.update_kind = UpdateKind {
            kind: UpdateKindType::Tag,
            local_value: Some("1.25".into()),
            remote_value: Some("1.26".into()),
            semver_diff: SemverDiff::Minor,
        };
        c
    }

    fn context(runtime: &Arc<InMemoryRuntime>, backups: &Arc<InMemoryBackupStore>, bus: &Arc<EventBus>) -> ProviderContext {
        ProviderContext {
            bus: Arc::clone(bus),
            runtime: runtime.clone(),
            backups: backups.clone(),
            audit: Arc::new(InMemoryAuditStore::new()),
            metrics: None,
        }
    }

    #[test]
    fn options_parse_and_validate() {
        let o = DockerOptions::from_settings(
            "docker.local",
            &settings(json!({"backupcount": "5", "autorollback": "true", "rollbackwindow": 60000, "rollbackinterval": "5000"})),
        )
        .unwrap();
        assert_eq!(o.backup_count, 5);
        assert!(o.auto_rollback);
        assert_eq!(o.rollback.window, Duration::from_secs(60));
        assert_eq!(o.rollback.interval, Duration::from_secs(5));

        assert!(DockerOptions::from_settings("d", &settings(json!({"backupcount": -1}))).is_err());
        assert!(DockerOptions::from_settings(
            "d",
            &settings(json!({"autorollback": true, "rollbackwindow": 1000, "rollbackinterval": 5000}))
        )
        .is_err());
        assert_eq!(DockerOptions::from_settings("d", &settings(json!({}))).unwrap(), DockerOptions::default());
    }

    #[test]
    fn target_image_follows_update_kind() {
        let c = container();
        assert_eq!(DockerTrigger::target_image(&c), "docker.io/library/nginx:1.26");
        let mut digest = c;
        digest.update_kind.kind = UpdateKindType::Digest;
        assert_eq!(DockerTrigger::target_image(&digest), "docker.io/library/nginx:1.25");
    }

    #[tokio::test]
    async fn update_replaces_container_and_emits_applied() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.add_container(ContainerInspection {
            id: "c1".into(),
            name: "web".into(),
            image: "docker.io/library/nginx:1.25".into(),
            running: true,
            health: HealthStatus::Healthy,
        });
        let backups = Arc::new(InMemoryBackupStore::new());
        let bus = Arc::new(EventBus::new());
        let applied = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&applied);
        let _h = bus.register_container_update_applied(HandlerOptions::default(), move |e| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(e.trigger.clone());
                Ok(())
            }
        });

        let trigger = DockerTrigger::new(
            "docker.local",
            DockerOptions {
                backup_count: 1,
                ..DockerOptions::default()
            },
            context(&runtime, &backups, &bus),
        );
        trigger.trigger(&container(), &Notification::default()).await.unwrap();

        assert_eq!(
            runtime.calls(),
            vec![
                "pull:docker.io/library/nginx:1.26",
                "stop-remove:c1",
                "recreate:web=docker.io/library/nginx:1.26",
            ]
        );
        assert_eq!(runtime.container_by_name("web").unwrap().image, "docker.io/library/nginx:1.26");
        assert_eq!(backups.get_backups("c1").unwrap()[0].image_tag, "1.25");
        assert_eq!(*applied.lock().unwrap(), vec!["docker.local"]);
        assert!(trigger.monitor("web").is_none());
    }

    #[tokio::test]
    async fn pull_failure_leaves_container_alone() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.fail_on(
            "pull",
            crate::error::RuntimeError::PullFailed {
                image: "x".into(),
                message: "denied".into(),
            },
        );
        let backups = Arc::new(InMemoryBackupStore::new());
        let bus = Arc::new(EventBus::new());
        let trigger = DockerTrigger::new("docker.local", DockerOptions::default(), context(&runtime, &backups, &bus));
        let err = trigger.trigger(&container(), &Notification::default()).await.unwrap_err();
        assert!(matches!(err, TriggerError::Runtime(_)));
        assert!(backups.get_backups("c1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_mode_is_unsupported() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let backups = Arc::new(InMemoryBackupStore::new());
        let bus = Arc::new(EventBus::new());
        let trigger = DockerTrigger::new("docker.local", DockerOptions::default(), context(&runtime, &backups, &bus));
        let err = trigger
            .trigger_batch(&[container()], &Notification::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::UnsupportedMode { ref provider, .. } if provider == "docker"));
        assert!(!trigger.is_reentrant());
        assert_eq!(trigger.mask_configuration(&Map::new()), Map::new());
    }
}
