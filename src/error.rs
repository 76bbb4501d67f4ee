//! Error types for driftwatch.
//!
//! All errors in driftwatch are strongly typed using thiserror.
//! Pure components (tag comparison, template rendering) never fail at
//! runtime; the enums here cover invalid call contracts, configuration
//! validation, handler failures and collaborator I/O.

use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Tag value is required")]
    MissingTag,

    #[error("Invalid value for setting '{key}' on trigger '{trigger}': {reason}")]
    InvalidSetting {
        trigger: String,
        key: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        reason: String,
    },

    #[error("Invalid health monitor options: {reason}")]
    InvalidMonitorOptions {
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },
}

/// A single handler's failure, as reported by the handler itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The handler's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised while emitting events on the bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Handler '{id}' failed on '{event}': {source}")]
    HandlerFailed {
        event: &'static str,
        id: String,
        #[source]
        source: HandlerError,
    },
}

/// Errors raised by the container runtime collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Container not found: {id}")]
    ContainerNotFound {
        id: String,
    },

    #[error("Container API error during {operation}: {message}")]
    Api {
        operation: String,
        message: String,
    },

    #[error("Image pull failed for {image}: {message}")]
    PullFailed {
        image: String,
        message: String,
    },
}

impl RuntimeError {
    /// Returns true if this failure is a transient API error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Api { .. })
    }
}

/// Errors that can occur in backup/audit storage collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No record matched.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Errors raised while running a trigger provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Trigger provider '{provider}' does not support mode '{mode}'")]
    UnsupportedMode {
        provider: String,
        mode: String,
    },

    #[error("Unknown trigger: {trigger}")]
    UnknownTrigger {
        trigger: String,
    },

    #[error("Trigger '{trigger}' failed: {message}")]
    Provider {
        trigger: String,
        message: String,
    },

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

/// Top-level error type for driftwatch.
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl DriftError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an event error.
    #[must_use]
    pub const fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }

    /// Returns true if this is a trigger error.
    #[must_use]
    pub const fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false, // Validation errors won't change on retry
            Self::Runtime(e) | Self::Trigger(TriggerError::Runtime(e)) => e.is_transient(),
            Self::Storage(StorageError::BackendError(_))
            | Self::Trigger(TriggerError::Storage(StorageError::BackendError(_))) => true,
            _ => false,
        }
    }
}

/// Result type alias for driftwatch operations.
pub type DriftResult<T> = Result<T, DriftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_setting() {
        let err = ValidationError::InvalidSetting {
            trigger: "slack.ops".to_string(),
            key: "threshold".to_string(),
            reason: "unknown level 'huge'".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("threshold"));
        assert!(msg.contains("slack.ops"));
        assert!(msg.contains("huge"));
    }

    #[test]
    fn test_event_error_carries_handler_id() {
        let err = EventError::HandlerFailed {
            event: "container-report",
            id: "audit".to_string(),
            source: HandlerError::new("disk full"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("audit"));
        assert!(msg.contains("container-report"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_unsupported_mode_message() {
        let err = TriggerError::UnsupportedMode {
            provider: "docker".to_string(),
            mode: "batch".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("docker"));
        assert!(msg.contains("batch"));
    }

    #[test]
    fn test_drift_error_from_validation() {
        let err: DriftError = ValidationError::MissingTag.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_drift_error_retryable() {
        let transient: DriftError = RuntimeError::Api {
            operation: "inspect".to_string(),
            message: "502".to_string(),
        }
        .into();
        assert!(transient.is_retryable());

        let missing: DriftError = RuntimeError::ContainerNotFound {
            id: "abc".to_string(),
        }
        .into();
        assert!(!missing.is_retryable());

        let nested: DriftError = TriggerError::Storage(StorageError::BackendError(
            "poisoned".to_string(),
        ))
        .into();
        assert!(nested.is_trigger());
        assert!(nested.is_retryable());
    }

    #[test]
    fn test_drift_error_internal() {
        let err = DriftError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
