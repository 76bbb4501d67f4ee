//! Ordered, awaited handler registries.
//!
//! Emission snapshots the current registrations, sorts them by
//! `(order, id, sequence)` and awaits each handler in turn. The first failure
//! aborts the remaining handlers of that emission.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::error::{EventError, HandlerError};

use super::Deregister;

/// Boxed future returned by ordered handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'static>>;

pub(crate) type AsyncHandler<P> = Arc<dyn Fn(Arc<P>) -> HandlerFuture + Send + Sync>;

/// Default handler priority.
pub const DEFAULT_ORDER: i64 = 100;

/// Ordering options for an awaited handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Lower runs first.
    pub order: i64,
    /// Tie-break after `order`, compared as a string.
    pub id: String,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            id: String::new(),
        }
    }
}

impl HandlerOptions {
    /// Options with an explicit order and id.
    #[must_use]
    pub fn new(order: i64, id: impl Into<String>) -> Self {
        Self {
            order,
            id: id.into(),
        }
    }

    /// Options with only an id; order stays at the default.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

struct Registration<P> {
    key: u64,
    sequence: u64,
    order: i64,
    id: String,
    handler: AsyncHandler<P>,
}

impl<P> Clone for Registration<P> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            sequence: self.sequence,
            order: self.order,
            id: self.id.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

pub(crate) struct OrderedRegistry<P> {
    event: &'static str,
    entries: Mutex<Vec<Registration<P>>>,
}

impl<P: Send + Sync + 'static> OrderedRegistry<P> {
    pub(crate) fn new(event: &'static str) -> Self {
        Self {
            event,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn insert(&self, key: u64, sequence: u64, options: HandlerOptions, handler: AsyncHandler<P>) {
        self.lock().push(Registration {
            key,
            sequence,
            order: options.order,
            id: options.id,
            handler,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Handlers in emission order.
    fn snapshot(&self) -> Vec<Registration<P>> {
        let mut snapshot = self.lock().clone();
        snapshot.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        snapshot
    }

    pub(crate) async fn emit(&self, payload: P) -> Result<(), EventError> {
        let payload = Arc::new(payload);
        for entry in self.snapshot() {
            if let Err(source) = (entry.handler)(Arc::clone(&payload)).await {
                warn!(
                    event = self.event,
                    handler = %entry.id,
                    order = entry.order,
                    error = %source,
                    "ordered event handler failed; aborting remaining handlers"
                );
                return Err(EventError::HandlerFailed {
                    event: self.event,
                    id: entry.id,
                    source,
                });
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration<P>>> {
        // Every mutation is a single push/retain/clear, so a poisoned list is still whole.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Send + Sync + 'static> Deregister for OrderedRegistry<P> {
    fn remove(&self, key: u64) {
        self.lock().retain(|r| r.key != key);
    }
}

/// Boxes an async closure into a stored handler.
pub(crate) fn boxed<P, F, Fut>(handler: F) -> AsyncHandler<P>
where
    P: Send + Sync + 'static,
    F: Fn(Arc<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |payload| -> HandlerFuture { Box::pin(handler(payload)) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> AsyncHandler<u32> {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        boxed(move |_p: Arc<u32>| {
            let log = Arc::clone(&log);
            let tag = tag.clone();
            async move {
                log.lock().unwrap().push(tag);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn sorts_by_order_then_id_then_sequence() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = OrderedRegistry::<u32>::new("container-report");
        reg.insert(1, 1, HandlerOptions::new(1, "b"), recorder(&log, "b"));
        reg.insert(2, 2, HandlerOptions::new(1, "a"), recorder(&log, "a"));
        reg.insert(3, 3, HandlerOptions::new(0, "z"), recorder(&log, "z"));
        reg.insert(4, 4, HandlerOptions::new(1, "a"), recorder(&log, "a2"));

        reg.emit(7).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["z", "a", "a2", "b"]);
    }

    #[tokio::test]
    async fn failure_aborts_remaining_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = OrderedRegistry::<u32>::new("container-report");
        reg.insert(1, 1, HandlerOptions::new(1, "first"), recorder(&log, "first"));
        reg.insert(
            2,
            2,
            HandlerOptions::new(2, "boom"),
            boxed(|_p: Arc<u32>| async { Err(HandlerError::new("boom")) }),
        );
        reg.insert(3, 3, HandlerOptions::new(3, "never"), recorder(&log, "never"));

        let err = reg.emit(1).await.unwrap_err();
        let EventError::HandlerFailed { event, id, source } = err;
        assert_eq!(event, "container-report");
        assert_eq!(id, "boom");
        assert_eq!(source.message(), "boom");
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn remove_drops_only_the_matching_key() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = OrderedRegistry::<u32>::new("container-report");
        reg.insert(10, 1, HandlerOptions::default(), recorder(&log, "x"));
        reg.insert(11, 2, HandlerOptions::default(), recorder(&log, "y"));
        reg.remove(10);
        assert_eq!(reg.len(), 1);
        reg.emit(0).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["y"]);
    }
}
