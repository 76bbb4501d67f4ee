//! Post-update health monitor with automatic rollback.
//!
//! A session runs two timers. The poll timer inspects the container every
//! `interval`. The window timer fires once after `window`. Exactly one
//! terminal transition happens per session:
//!
//! | Trigger | Terminal state |
//! |---|---|
//! | poll sees no health check | [`MonitorState::Unmonitored`] |
//! | poll sees `unhealthy`, rollback succeeds | [`MonitorState::RolledBack`] |
//! | poll sees `unhealthy`, rollback fails | [`MonitorState::RollbackFailed`] |
//! | window elapses first | [`MonitorState::Healthy`] |
//! | [`HealthMonitorHandle::cancel`] | [`MonitorState::Cancelled`] |
//!
//! The transition is claimed by swapping a single `stopped` flag, so a
//! cancellation racing a poll or the window never runs cleanup twice and never
//! rolls back after the session was cancelled. Inspection errors are logged
//! and treated as inconclusive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::container::Container;
use crate::error::{StorageError, TriggerError, ValidationError};
use crate::runtime::{ContainerRuntime, HealthStatus};
use crate::store::{AuditEntry, AuditStatus, AuditStore, Backup, BackupStore, MetricsSink};

/// Audit action and metrics label for rollbacks started by the monitor.
pub const AUTO_ROLLBACK_ACTION: &str = "auto-rollback";

/// Counter incremented on every successful automatic rollback.
pub const ROLLBACK_COUNTER: &str = "rollback_total";

/// Observation timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitorConfig {
    /// Total observation time.
    pub window: Duration,
    /// Time between inspections.
    pub interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            interval: Duration::from_secs(10),
        }
    }
}

impl HealthMonitorConfig {
    /// Checks that both durations are non-zero and `interval <= window`.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidMonitorOptions` describing the problem.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| {
            Err(ValidationError::InvalidMonitorOptions {
                reason: reason.to_string(),
            })
        };
        if self.window.is_zero() {
            return invalid("window must be greater than zero");
        }
        if self.interval.is_zero() {
            return invalid("interval must be greater than zero");
        }
        if self.interval > self.window {
            return invalid("interval must not exceed window");
        }
        Ok(())
    }
}

/// Everything a monitoring session needs.
#[derive(Clone)]
pub struct HealthMonitorOptions {
    /// Runtime id of the container to observe (the recreated one).
    pub container_id: String,
    /// Logical container; its id keys the backups and its name the audit log.
    pub container: Container,
    /// Timings.
    pub config: HealthMonitorConfig,
    /// Runtime used for inspection and rollback.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Source of the image to roll back to.
    pub backups: Arc<dyn BackupStore>,
    /// Audit sink.
    pub audit: Arc<dyn AuditStore>,
    /// Optional metrics sink.
    pub metrics: Option<Arc<dyn MetricsSink>>,
}

impl std::fmt::Debug for HealthMonitorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitorOptions")
            .field("container_id", &self.container_id)
            .field("container", &self.container.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorState {
    /// Timers running.
    Polling,
    /// The window elapsed without an unhealthy observation.
    Healthy,
    /// The container has no health check.
    Unmonitored,
    /// Unhealthy; the backup image was restored.
    RolledBack,
    /// Unhealthy; restoring the backup failed.
    RollbackFailed,
    /// Cancelled from outside.
    Cancelled,
}

impl MonitorState {
    /// True for every state but `Polling`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Polling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Poll,
    Window,
}

#[derive(Debug, Default)]
struct Timers {
    poll: Option<JoinHandle<()>>,
    window: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Session {
    container_name: String,
    stopped: AtomicBool,
    timers: Mutex<Timers>,
    state: watch::Sender<MonitorState>,
}

impl Session {
    /// Claims the terminal transition and aborts the timers.
    ///
    /// Returns false if another path already claimed it. The calling timer's
    /// own handle is detached rather than aborted so it can finish its work.
    fn stop(&self, caller: Option<Timer>) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        let (poll, window) = {
            let mut timers = self.lock_timers();
            (timers.poll.take(), timers.window.take())
        };
        for (timer, handle) in [(Timer::Poll, poll), (Timer::Window, window)] {
            if let Some(handle) = handle {
                if caller != Some(timer) {
                    handle.abort();
                }
            }
        }
        true
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn publish(&self, state: MonitorState) {
        self.state.send_replace(state);
    }

    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running session.
///
/// Dropping the handle leaves the session running.
#[derive(Debug, Clone)]
pub struct HealthMonitorHandle {
    session: Arc<Session>,
    state: watch::Receiver<MonitorState>,
}

impl HealthMonitorHandle {
    /// Stops the session. Idempotent; a no-op once a terminal transition
    /// has been claimed.
    pub fn cancel(&self) {
        if self.session.stop(None) {
            info!(container = %self.session.container_name, "health monitor cancelled");
            self.session.publish(MonitorState::Cancelled);
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// True once a terminal transition was claimed (it may still be running,
    /// e.g. during a rollback).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.session.is_stopped()
    }

    /// Waits for the terminal state.
    pub async fn wait(&self) -> MonitorState {
        let mut rx = self.state.clone();
        let result = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        result.unwrap_or_else(|_| *rx.borrow())
    }
}

/// Starts a monitoring session. Must be called inside a tokio runtime.
///
/// # Errors
///
/// Invalid timings.
pub fn start_health_monitor(options: HealthMonitorOptions) -> Result<HealthMonitorHandle, ValidationError> {
    options.config.validate()?;

    let (tx, rx) = watch::channel(MonitorState::Polling);
    let session = Arc::new(Session {
        container_name: options.container.name.clone(),
        stopped: AtomicBool::new(false),
        timers: Mutex::new(Timers::default()),
        state: tx,
    });

    info!(
        container = %options.container.name,
        window_ms = options.config.window.as_millis(),
        interval_ms = options.config.interval.as_millis(),
        "health monitor started"
    );

    let window = options.config.window;
    {
        // Held while spawning so neither timer can stop the session before
        // both handles are stored.
        let mut timers = session.lock_timers();
        timers.poll = Some(tokio::spawn(poll_loop(Arc::clone(&session), options)));
        timers.window = Some(tokio::spawn(window_timer(Arc::clone(&session), window)));
    }

    Ok(HealthMonitorHandle { session, state: rx })
}

async fn window_timer(session: Arc<Session>, window: Duration) {
    tokio::time::sleep(window).await;
    if session.stop(Some(Timer::Window)) {
        info!(container = %session.container_name, "health window elapsed; container healthy");
        session.publish(MonitorState::Healthy);
    }
}

async fn poll_loop(session: Arc<Session>, options: HealthMonitorOptions) {
    let period = options.config.interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if session.is_stopped() {
            return;
        }

        let health = match options.runtime.inspect(&options.container_id).await {
            Ok(inspection) => inspection.health,
            Err(e) => {
                warn!(
                    container = %options.container.name,
                    transient = e.is_transient(),
                    error = %e,
                    "health inspection inconclusive"
                );
                continue;
            }
        };

        match health {
            HealthStatus::None => {
                if session.stop(Some(Timer::Poll)) {
                    info!(container = %options.container.name, "no health check configured; monitor stopped");
                    session.publish(MonitorState::Unmonitored);
                }
                return;
            }
            HealthStatus::Unhealthy => {
                // Checked here so nothing happens after an external cancel.
                if !session.stop(Some(Timer::Poll)) {
                    return;
                }
                warn!(container = %options.container.name, "container unhealthy; rolling back");
                let state = rollback_and_record(&options).await;
                session.publish(state);
                return;
            }
            HealthStatus::Starting | HealthStatus::Healthy => {}
        }
    }
}

async fn rollback_and_record(options: &HealthMonitorOptions) -> MonitorState {
    let name = &options.container.name;
    let from = Some(options.container.image.tag.clone());
    match rollback(options).await {
        Ok(backup) => {
            info!(container = %name, image = %backup.image_reference(), "rollback succeeded");
            record(
                options,
                AuditEntry::new(AUTO_ROLLBACK_ACTION, name.clone(), AuditStatus::Success)
                    .with_image(backup.image_reference())
                    .with_versions(from, Some(backup.image_tag.clone())),
            );
            if let Some(metrics) = &options.metrics {
                metrics.inc_counter(ROLLBACK_COUNTER, &[("action", AUTO_ROLLBACK_ACTION)]);
            }
            MonitorState::RolledBack
        }
        Err(e) => {
            error!(container = %name, error = %e, "rollback failed");
            record(
                options,
                AuditEntry::new(AUTO_ROLLBACK_ACTION, name.clone(), AuditStatus::Error)
                    .with_details(e.to_string()),
            );
            MonitorState::RollbackFailed
        }
    }
}

async fn rollback(options: &HealthMonitorOptions) -> Result<Backup, TriggerError> {
    let backup = options
        .backups
        .latest_backup(&options.container.id)?
        .ok_or_else(|| StorageError::NotFound(format!("backup for container {}", options.container.name)))?;
    options.runtime.stop_and_remove(&options.container_id).await?;
    options
        .runtime
        .recreate(&options.container, &backup.image_reference())
        .await?;
    Ok(backup)
}

fn record(options: &HealthMonitorOptions, entry: AuditEntry) {
    if let Err(e) = options.audit.insert_audit(entry) {
        warn!(container = %options.container.name, error = %e, "failed to record audit entry");
    }
}
