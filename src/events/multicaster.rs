//! Synchronous event fan-out.
//!
//! Listener lists are copy-on-write: registration swaps in a new list while
//! publication iterates over a snapshot, so listeners may (un)register from
//! inside a callback without deadlocking.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, warn};

use super::{EventListener, LifecycleEvent};

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Registration<E> {
    id: ListenerId,
    listener: Arc<dyn EventListener<E>>,
}

impl<E> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self { id: self.id, listener: Arc::clone(&self.listener) }
    }
}

type ListenerList<E> = RwLock<Arc<Vec<Registration<E>>>>;

/// Delivers events to listeners in registration order.
///
/// A listener that returns an error or panics is logged and skipped; delivery
/// continues with the next listener.
pub struct EventMulticaster<E> {
    listeners: ListenerList<E>,
    error_listeners: ListenerList<E>,
    next_id: AtomicU64,
}

impl<E: LifecycleEvent> Default for EventMulticaster<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: LifecycleEvent> EventMulticaster<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            error_listeners: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener<E> + 'static,
    {
        self.add_shared_listener(Arc::new(listener))
    }

    pub fn add_shared_listener(&self, listener: Arc<dyn EventListener<E>>) -> ListenerId {
        self.register(&self.listeners, listener)
    }

    /// Returns `false` if no regular listener had this id.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        Self::unregister(&self.listeners, id)
    }

    pub fn add_error_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener<E> + 'static,
    {
        self.add_shared_error_listener(Arc::new(listener))
    }

    pub fn add_shared_error_listener(&self, listener: Arc<dyn EventListener<E>>) -> ListenerId {
        self.register(&self.error_listeners, listener)
    }

    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        Self::unregister(&self.error_listeners, id)
    }

    pub fn listener_count(&self) -> usize {
        Self::snapshot(&self.listeners).len()
    }

    pub fn error_listener_count(&self) -> usize {
        Self::snapshot(&self.error_listeners).len()
    }

    /// Deliver `event` to every matching listener before returning.
    pub fn multicast_event(&self, event: &E) {
        let targets = if event.is_error() {
            Self::snapshot(&self.error_listeners)
        } else {
            Self::snapshot(&self.listeners)
        };

        for registration in targets.iter() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| registration.listener.on_event(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        listener = %registration.id,
                        event = event.kind(),
                        error = %e,
                        "Event listener failed"
                    );
                }
                Err(_) => {
                    error!(
                        listener = %registration.id,
                        event = event.kind(),
                        "Event listener panicked"
                    );
                }
            }
        }
    }

    fn register(&self, list: &ListenerList<E>, listener: Arc<dyn EventListener<E>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = list.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated: Vec<Registration<E>> = guard.as_ref().clone();
        updated.push(Registration { id, listener });
        *guard = Arc::new(updated);
        id
    }

    fn unregister(list: &ListenerList<E>, id: ListenerId) -> bool {
        let mut guard = list.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|r| r.id == id) {
            return false;
        }
        let updated: Vec<Registration<E>> = guard.iter().filter(|r| r.id != id).cloned().collect();
        *guard = Arc::new(updated);
        true
    }

    fn snapshot(list: &ListenerList<E>) -> Arc<Vec<Registration<E>>> {
        Arc::clone(&list.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<E: LifecycleEvent> fmt::Debug for EventMulticaster<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMulticaster")
            .field("listeners", &self.listener_count())
            .field("error_listeners", &self.error_listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LeaseEvent, ListenerResult, SecretNotFound};
    use crate::domain::SecretHandle;
    use crate::errors::LifecycleError;
    use crate::events::LeaseFailure;
    use crate::domain::Lease;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn not_found() -> LeaseEvent {
        LeaseEvent::NotFound(SecretNotFound {
            handle: SecretHandle::new(),
            path: "secret/x".into(),
        })
    }

    fn failure() -> LeaseEvent {
        LeaseEvent::Error(LeaseFailure {
            handle: SecretHandle::new(),
            path: "secret/x".into(),
            lease: Lease::none(),
            error: LifecycleError::transport("connection reset"),
        })
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
    ) -> impl Fn(&LeaseEvent) -> ListenerResult {
        let log = Arc::clone(log);
        move |event: &LeaseEvent| {
            log.lock().unwrap().push(format!("{}:{}", name, event.kind()));
            Ok(())
        }
    }

    #[test]
    fn test_delivers_in_registration_order() {
        let multicaster = EventMulticaster::<LeaseEvent>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        multicaster.add_listener(recorder(&log, "first"));
        multicaster.add_listener(recorder(&log, "second"));
        multicaster.multicast_event(&not_found());

        assert_eq!(*log.lock().unwrap(), vec!["first:not_found", "second:not_found"]);
    }

    #[test]
    fn test_error_events_only_reach_error_listeners() {
        let multicaster = EventMulticaster::<LeaseEvent>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        multicaster.add_listener(recorder(&log, "regular"));
        multicaster.add_error_listener(recorder(&log, "errors"));

        multicaster.multicast_event(&failure());
        multicaster.multicast_event(&not_found());

        assert_eq!(*log.lock().unwrap(), vec!["errors:error", "regular:not_found"]);
    }

    #[test]
    fn test_removed_listener_stops_receiving() {
        let multicaster = EventMulticaster::<LeaseEvent>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = multicaster.add_listener(recorder(&log, "gone"));
        assert!(multicaster.remove_listener(id));
        assert!(!multicaster.remove_listener(id));
        assert!(!multicaster.remove_error_listener(id));

        multicaster.multicast_event(&not_found());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(multicaster.listener_count(), 0);
    }

    #[test]
    #[traced_test]
    fn test_failing_and_panicking_listeners_are_isolated() {
        let multicaster = EventMulticaster::<LeaseEvent>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        multicaster
            .add_listener(|_: &LeaseEvent| -> ListenerResult { Err("listener broke".into()) });
        multicaster
            .add_listener(|_: &LeaseEvent| -> ListenerResult { panic!("listener exploded") });
        multicaster.add_listener(recorder(&log, "survivor"));

        multicaster.multicast_event(&not_found());

        assert_eq!(*log.lock().unwrap(), vec!["survivor:not_found"]);
        assert!(logs_contain("Event listener failed"));
        assert!(logs_contain("Event listener panicked"));
    }

    #[test]
    fn test_listener_can_register_during_delivery() {
        let multicaster = Arc::new(EventMulticaster::<LeaseEvent>::new());
        let inner = Arc::clone(&multicaster);

        multicaster.add_listener(move |_: &LeaseEvent| -> ListenerResult {
            inner.add_listener(|_: &LeaseEvent| -> ListenerResult { Ok(()) });
            Ok(())
        });

        multicaster.multicast_event(&not_found());
        assert_eq!(multicaster.listener_count(), 2);
    }
}
