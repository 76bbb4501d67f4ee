//! # driftwatch - container update intelligence and notification dispatch
//!
//! driftwatch decides what to do when a watched container has a newer image.
//! It classifies the difference between the running and the remote tag,
//! pushes lifecycle events through an ordered event bus, renders notification
//! templates without a scripting engine, resolves shared trigger settings and
//! dispatches triggers. Docker-style triggers can watch a recreated container
//! and roll it back when it turns unhealthy.
//!
//! Container runtimes, backup storage, the audit log and metrics are injected
//! collaborators (see [`runtime`] and [`store`]).
//!
//! ## Core Concepts
//!
//! - **Container**: a snapshot of a watched container and its update state
//! - **UpdateKind**: tag or digest update, with its semver severity
//! - **Trigger**: a configured provider instance (`log.ops`, `docker.local`)
//! - **EventBus**: fire-and-forget listeners plus ordered, awaited handlers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use driftwatch::config::{DispatcherConfig, RawConfig};
//! use driftwatch::trigger::{ProviderContext, TriggerDispatcher};
//!
//! let raw = RawConfig::from_env("DW_TRIGGER");
//! let dispatcher = Arc::new(TriggerDispatcher::from_config(DispatcherConfig::default(), &raw, &ctx)?);
//! let _handle = dispatcher.attach(&ctx.bus);
//!
//! // A watch cycle emits its reports; the dispatcher runs the eligible triggers.
//! ctx.bus.emit_container_reports(reports).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod container;
pub mod error;
pub mod tag;

// Engine
pub mod config;
pub mod events;
pub mod health;
pub mod render;
pub mod trigger;

// Collaborators
pub mod runtime;
pub mod store;

// Re-export primary types at crate root for convenience
pub use config::{DispatcherConfig, Mode, RawConfig, Threshold, TriggerInstanceConfig, TriggerSettings};
pub use container::{Container, ContainerImage, UpdateKind, UpdateKindType, UpdatePolicy, UpdateResult};
pub use error::{
    DriftError, DriftResult, EventError, HandlerError, RuntimeError, StorageError, TriggerError,
    ValidationError,
};
pub use events::{ContainerReport, EventBus, EventKind, HandlerOptions, Unregister};
pub use health::{start_health_monitor, HealthMonitorConfig, HealthMonitorHandle, HealthMonitorOptions, MonitorState};
pub use render::{render, render_batch, render_simple, Scope};
pub use runtime::{ContainerInspection, ContainerRuntime, HealthStatus, InMemoryRuntime};
pub use store::{AuditEntry, AuditStatus, AuditStore, Backup, BackupStore, MetricsSink};
pub use tag::{SemverDiff, Version};
pub use trigger::{DispatchReport, Notification, ProviderContext, ProviderKind, TriggerDispatcher, TriggerProvider};
