//! Ordered event bus.
//!
//! Two families of events share one bus:
//!
//! - **Fire-and-forget** (`container-added/updated/removed`,
//!   `watcher-start/stop`, `self-update-starting`): synchronous delivery in
//!   registration order. A failing listener halts delivery and its error is
//!   returned from `emit_*`.
//! - **Ordered-awaited** (`container-report`, `container-reports`,
//!   `container-update-applied`, `container-update-failed`): handlers are
//!   sorted by `(order, id, registration sequence)` and awaited one at a
//!   time. The first failure aborts the rest of that emission.
//!
//! The bus is a plain value. Share it with `Arc` and use [`EventBus::reset`]
//! to isolate tests.

/// Fire-and-forget listener lists.
mod listeners;
/// Awaited handler registries.
mod ordered;
/// Event payload types.
pub mod payload;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::container::Container;
use crate::error::{EventError, HandlerError};

use listeners::{Listener, ListenerRegistry};
use ordered::{boxed, OrderedRegistry};

pub use ordered::{HandlerFuture, HandlerOptions, DEFAULT_ORDER};
pub use payload::{
    ContainerReport, EventKind, SelfUpdateEvent, UpdateApplied, UpdateFailed, WatcherEvent,
};

/// A registry that can drop one registration by key.
pub(crate) trait Deregister: Send + Sync {
    fn remove(&self, key: u64);
}

/// Handle returned by every registration.
///
/// Dropping the handle does not unregister; call [`Unregister::unregister`].
#[must_use = "keep the handle to be able to unregister"]
pub struct Unregister {
    target: Weak<dyn Deregister>,
    key: u64,
    done: AtomicBool,
}

impl Unregister {
    fn new(target: Weak<dyn Deregister>, key: u64) -> Self {
        Self {
            target,
            key,
            done: AtomicBool::new(false),
        }
    }

    /// Removes exactly the registration this handle was returned for.
    ///
    /// Idempotent. A no-op once the bus is gone or was reset.
    pub fn unregister(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(target) = self.target.upgrade() {
            target.remove(self.key);
        }
    }

    /// True once `unregister` has been called.
    #[must_use]
    pub fn is_unregistered(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Unregister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unregister")
            .field("key", &self.key)
            .field("done", &self.is_unregistered())
            .finish()
    }
}

/// Process-local event bus.
pub struct EventBus {
    /// Tie-break sequence; reset by `reset()`.
    sequence: AtomicU64,
    /// Registration identity; never reset so stale handles stay harmless.
    keys: AtomicU64,

    container_added: Arc<ListenerRegistry<Container>>,
    container_updated: Arc<ListenerRegistry<Container>>,
    container_removed: Arc<ListenerRegistry<Container>>,
    watcher_start: Arc<ListenerRegistry<WatcherEvent>>,
    watcher_stop: Arc<ListenerRegistry<WatcherEvent>>,
    self_update_starting: Arc<ListenerRegistry<SelfUpdateEvent>>,

    container_report: Arc<OrderedRegistry<ContainerReport>>,
    container_reports: Arc<OrderedRegistry<Vec<ContainerReport>>>,
    update_applied: Arc<OrderedRegistry<UpdateApplied>>,
    update_failed: Arc<OrderedRegistry<UpdateFailed>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("container_report", &self.handler_count(EventKind::ContainerReport))
            .field("container_reports", &self.handler_count(EventKind::ContainerReports))
            .field("update_applied", &self.handler_count(EventKind::ContainerUpdateApplied))
            .field("update_failed", &self.handler_count(EventKind::ContainerUpdateFailed))
            .finish_non_exhaustive()
    }
}

macro_rules! listener_family {
    ($on:ident, $emit:ident, $field:ident, $payload:ty, $doc:literal) => {
        #[doc = concat!("Registers a listener for `", $doc, "`.")]
        pub fn $on<F>(&self, listener: F) -> Unregister
        where
            F: Fn(&$payload) -> Result<(), HandlerError> + Send + Sync + 'static,
        {
            let key = self.next_key();
            let listener: Listener<$payload> = Arc::new(listener);
            self.$field.insert(key, listener);
            Unregister::new(Self::weak(&self.$field), key)
        }

        #[doc = concat!("Emits `", $doc, "` to every listener, in registration order.")]
        ///
        /// # Errors
        ///
        /// Returns the first listener failure; later listeners are not called.
        pub fn $emit(&self, payload: &$payload) -> Result<(), EventError> {
            self.$field.emit(payload)
        }
    };
}

macro_rules! ordered_family {
    ($register:ident, $emit:ident, $field:ident, $payload:ty, $doc:literal) => {
        #[doc = concat!("Registers an awaited handler for `", $doc, "`.")]
        pub fn $register<F, Fut>(&self, options: HandlerOptions, handler: F) -> Unregister
        where
            F: Fn(Arc<$payload>) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
        {
            let key = self.next_key();
            let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);
            self.$field.insert(key, sequence, options, boxed(handler));
            Unregister::new(Self::weak(&self.$field), key)
        }

        #[doc = concat!("Emits `", $doc, "` and awaits every handler in order.")]
        ///
        /// # Errors
        ///
        /// Returns the first handler failure; later handlers are not run.
        pub async fn $emit(&self, payload: $payload) -> Result<(), EventError> {
            self.$field.emit(payload).await
        }
    };
}

impl EventBus {
    /// An empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            keys: AtomicU64::new(0),
            container_added: Arc::new(ListenerRegistry::new(EventKind::ContainerAdded.as_str())),
            container_updated: Arc::new(ListenerRegistry::new(EventKind::ContainerUpdated.as_str())),
            container_removed: Arc::new(ListenerRegistry::new(EventKind::ContainerRemoved.as_str())),
            watcher_start: Arc::new(ListenerRegistry::new(EventKind::WatcherStart.as_str())),
            watcher_stop: Arc::new(ListenerRegistry::new(EventKind::WatcherStop.as_str())),
            self_update_starting: Arc::new(ListenerRegistry::new(
                EventKind::SelfUpdateStarting.as_str(),
            )),
            container_report: Arc::new(OrderedRegistry::new(EventKind::ContainerReport.as_str())),
            container_reports: Arc::new(OrderedRegistry::new(EventKind::ContainerReports.as_str())),
            update_applied: Arc::new(OrderedRegistry::new(
                EventKind::ContainerUpdateApplied.as_str(),
            )),
            update_failed: Arc::new(OrderedRegistry::new(
                EventKind::ContainerUpdateFailed.as_str(),
            )),
        }
    }

    /// Clears every registration and restarts the tie-break sequence.
    ///
    /// Handles issued before the reset become no-ops.
    pub fn reset(&self) {
        self.container_added.clear();
        self.container_updated.clear();
        self.container_removed.clear();
        self.watcher_start.clear();
        self.watcher_stop.clear();
        self.self_update_starting.clear();
        self.container_report.clear();
        self.container_reports.clear();
        self.update_applied.clear();
        self.update_failed.clear();
        self.sequence.store(0, Ordering::Release);
    }

    /// Number of registrations for `kind`.
    #[must_use]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::ContainerAdded => self.container_added.len(),
            EventKind::ContainerUpdated => self.container_updated.len(),
            EventKind::ContainerRemoved => self.container_removed.len(),
            EventKind::WatcherStart => self.watcher_start.len(),
            EventKind::WatcherStop => self.watcher_stop.len(),
            EventKind::SelfUpdateStarting => self.self_update_starting.len(),
            EventKind::ContainerReport => self.container_report.len(),
            EventKind::ContainerReports => self.container_reports.len(),
            EventKind::ContainerUpdateApplied => self.update_applied.len(),
            EventKind::ContainerUpdateFailed => self.update_failed.len(),
        }
    }

    listener_family!(on_container_added, emit_container_added, container_added, Container, "container-added");
    listener_family!(on_container_updated, emit_container_updated, container_updated, Container, "container-updated");
    listener_family!(on_container_removed, emit_container_removed, container_removed, Container, "container-removed");
    listener_family!(on_watcher_start, emit_watcher_start, watcher_start, WatcherEvent, "watcher-start");
    listener_family!(on_watcher_stop, emit_watcher_stop, watcher_stop, WatcherEvent, "watcher-stop");
    listener_family!(
        on_self_update_starting,
        emit_self_update_starting,
        self_update_starting,
        SelfUpdateEvent,
        "self-update-starting"
    );

    ordered_family!(
        register_container_report,
        emit_container_report,
        container_report,
        ContainerReport,
        "container-report"
    );
    ordered_family!(
        register_container_reports,
        emit_container_reports,
        container_reports,
        Vec<ContainerReport>,
        "container-reports"
    );
    ordered_family!(
        register_container_update_applied,
        emit_container_update_applied,
        update_applied,
        UpdateApplied,
        "container-update-applied"
    );
    ordered_family!(
        register_container_update_failed,
        emit_container_update_failed,
        update_failed,
        UpdateFailed,
        "container-update-failed"
    );

    fn next_key(&self) -> u64 {
        self.keys.fetch_add(1, Ordering::AcqRel)
    }

    fn weak<R: Deregister + 'static>(registry: &Arc<R>) -> Weak<dyn Deregister> {
        let registry: Arc<dyn Deregister> = Arc::clone(registry) as Arc<dyn Deregister>;
        Arc::downgrade(&registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn report(name: &str) -> ContainerReport {
        ContainerReport::new(
            Container {
                id: name.to_string(),
                name: name.to_string(),
                ..Container::default()
            },
            true,
        )
    }

    #[tokio::test]
    async fn ties_on_order_break_on_id_not_registration() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for id in ["b", "a"] {
            let seen = Arc::clone(&seen);
            let _handle = bus.register_container_report(HandlerOptions::new(1, id), move |_r| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(id);
                    Ok(())
                }
            });
        }
        bus.emit_container_report(report("web")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unregister_is_exact_and_idempotent() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let make = |hits: &Arc<AtomicU64>| {
            let hits = Arc::clone(hits);
            move |_r: Arc<ContainerReport>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };
        let first = bus.register_container_report(HandlerOptions::with_id("dup"), make(&hits));
        let _second = bus.register_container_report(HandlerOptions::with_id("dup"), make(&hits));

        first.unregister();
        first.unregister();
        assert!(first.is_unregistered());
        assert_eq!(bus.handler_count(EventKind::ContainerReport), 1);

        bus.emit_container_report(report("web")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_clears_everything_and_stale_handles_are_harmless() {
        let bus = EventBus::new();
        let stale = bus.on_container_added(|_c| Ok(()));
        let _r = bus.register_container_reports(HandlerOptions::default(), |_r| async { Ok(()) });
        bus.reset();
        assert_eq!(bus.handler_count(EventKind::ContainerAdded), 0);
        assert_eq!(bus.handler_count(EventKind::ContainerReports), 0);

        let _fresh = bus.on_container_added(|_c| Ok(()));
        stale.unregister();
        assert_eq!(bus.handler_count(EventKind::ContainerAdded), 1);
    }

    #[test]
    fn listener_error_propagates_to_emitter() {
        let bus = EventBus::new();
        let _h = bus.on_watcher_start(|w| {
            if w.watcher == "broken" {
                Err(HandlerError::new("cannot start"))
            } else {
                Ok(())
            }
        });
        assert!(bus
            .emit_watcher_start(&WatcherEvent {
                watcher: "local".to_string()
            })
            .is_ok());
        let err = bus
            .emit_watcher_start(&WatcherEvent {
                watcher: "broken".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("watcher-start"));
    }
}
