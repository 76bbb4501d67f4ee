//! Fire-and-forget listener lists.
//!
//! Delivery is synchronous and follows registration order. A failing listener
//! stops delivery and the error is returned to the emitter.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::error::{EventError, HandlerError};

use super::Deregister;

pub(crate) type Listener<P> = Arc<dyn Fn(&P) -> Result<(), HandlerError> + Send + Sync>;

struct Entry<P> {
    key: u64,
    listener: Listener<P>,
}

pub(crate) struct ListenerRegistry<P> {
    event: &'static str,
    entries: Mutex<Vec<Entry<P>>>,
}

impl<P> ListenerRegistry<P> {
    pub(crate) fn new(event: &'static str) -> Self {
        Self {
            event,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn insert(&self, key: u64, listener: Listener<P>) {
        self.lock().push(Entry { key, listener });
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn emit(&self, payload: &P) -> Result<(), EventError> {
        // Snapshot so a listener may register or unregister without deadlocking.
        let listeners: Vec<Listener<P>> = self.lock().iter().map(|e| Arc::clone(&e.listener)).collect();

        for (position, listener) in listeners.into_iter().enumerate() {
            if let Err(source) = listener(payload) {
                warn!(event = self.event, position, error = %source, "event listener failed");
                return Err(EventError::HandlerFailed {
                    event: self.event,
                    id: format!("listener-{position}"),
                    source,
                });
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry<P>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Send + Sync> Deregister for ListenerRegistry<P> {
    fn remove(&self, key: u64) {
        self.lock().retain(|e| e.key != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_registration_order_and_halts_on_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reg = ListenerRegistry::<u32>::new("container-added");

        let s1 = Arc::clone(&seen);
        reg.insert(1, Arc::new(move |p: &u32| {
            s1.lock().unwrap().push(*p);
            Ok(())
        }));
        reg.insert(2, Arc::new(|_: &u32| Err(HandlerError::new("nope"))));
        let s3 = Arc::clone(&seen);
        reg.insert(3, Arc::new(move |p: &u32| {
            s3.lock().unwrap().push(*p * 10);
            Ok(())
        }));

        let err = reg.emit(&4).unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert_eq!(*seen.lock().unwrap(), vec![4]);

        reg.remove(2);
        reg.emit(&5).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![4, 5, 50]);
    }
}
