//! Log provider: writes notifications through `tracing`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::TriggerSettings;
use crate::container::Container;
use crate::error::{TriggerError, ValidationError};

use super::provider::{Notification, ProviderKind, TriggerProvider};

/// Level notifications are written at.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
}

impl LogLevel {
    fn parse(trigger: &str, value: Option<String>) -> Result<Self, ValidationError> {
        match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("info") => Ok(Self::Info),
            Some("debug") => Ok(Self::Debug),
            Some("warn") => Ok(Self::Warn),
            Some(other) => Err(ValidationError::InvalidSetting {
                trigger: trigger.to_string(),
                key: "level".to_string(),
                reason: format!("unknown log level '{other}'"),
            }),
        }
    }
}

/// Emits each notification as a structured log event.
#[derive(Debug, Clone)]
pub struct LogTrigger {
    id: String,
    level: LogLevel,
}

impl LogTrigger {
    /// A log trigger named `id` writing at `level`.
    #[must_use]
    pub fn new(id: impl Into<String>, level: LogLevel) -> Self {
        Self {
            id: id.into(),
            level,
        }
    }

    /// Builds from resolved settings (`level`: debug, info or warn).
    ///
    /// # Errors
    ///
    /// Unknown `level` values.
    pub fn from_settings(id: &str, settings: &TriggerSettings) -> Result<Self, ValidationError> {
        Ok(Self::new(id, LogLevel::parse(id, settings.extra_str("level"))?))
    }

    /// Configured level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    fn emit(&self, containers: &str, notification: &Notification) {
        let (trigger, title, body) = (&self.id, &notification.title, &notification.body);
        match self.level {
            LogLevel::Debug => debug!(%trigger, %containers, %title, %body, "update notification"),
            LogLevel::Info => info!(%trigger, %containers, %title, %body, "update notification"),
            LogLevel::Warn => warn!(%trigger, %containers, %title, %body, "update notification"),
        }
    }
}

#[async_trait]
impl TriggerProvider for LogTrigger {
    fn provider_type(&self) -> &str {
        ProviderKind::Log.as_str()
    }

    async fn trigger(&self, container: &Container, notification: &Notification) -> Result<(), TriggerError> {
        self.emit(&container.name, notification);
        Ok(())
    }

    async fn trigger_batch(
        &self,
        containers: &[Container],
        notification: &Notification,
    ) -> Result<(), TriggerError> {
        let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
        self.emit(&names.join(","), notification);
        Ok(())
    }

    fn configuration_schema(&self) -> Value {
        json!({
            "level": {"type": "string", "enum": ["debug", "info", "warn"], "default": "info"}
        })
    }

    fn is_reentrant(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn level_parsing() {
        let mut extra = Map::new();
        extra.insert("level".into(), json!("WARN"));
        let settings = TriggerSettings {
            extra,
            ..TriggerSettings::default()
        };
        assert_eq!(
            LogTrigger::from_settings("log.ops", &settings).unwrap().level(),
            LogLevel::Warn
        );

        let mut extra = Map::new();
        extra.insert("level".into(), json!("loud"));
        let settings = TriggerSettings {
            extra,
            ..TriggerSettings::default()
        };
        assert!(LogTrigger::from_settings("log.ops", &settings).is_err());
    }

    #[tokio::test]
    async fn supports_both_modes() {
        let log = LogTrigger::new("log.default", LogLevel::Info);
        let c = Container {
            name: "web".into(),
            ..Container::default()
        };
        let n = Notification::default();
        assert!(log.trigger(&c, &n).await.is_ok());
        assert!(log.trigger_batch(&[c], &n).await.is_ok());
        assert!(log.is_reentrant());
    }
}
