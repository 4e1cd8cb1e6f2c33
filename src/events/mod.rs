//! Lifecycle events
//!
//! Session and lease engines publish what happened to their credentials and
//! leases as closed enums. Observers subscribe through an
//! [`EventMulticaster`]; error events reach error listeners only, everything
//! else reaches regular listeners.

pub mod authentication;
pub mod lease;
pub mod listeners;
pub mod multicaster;

use std::fmt;

pub use authentication::{AuthenticationErrorEvent, AuthenticationEvent, CredentialEvent};
pub use lease::{
    LeaseCreated, LeaseEvent, LeaseFailure, LeaseRenewed, LeaseRotated, SecretLeaseEvent,
    SecretNotFound,
};
pub use listeners::{LoggingListener, MetricsListener};
pub use multicaster::{EventMulticaster, ListenerId};

/// Outcome of a single listener invocation. Failures are logged by the
/// multicaster and never reach the publishing engine.
pub type ListenerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Common shape of published events.
pub trait LifecycleEvent: fmt::Debug + Send + Sync + 'static {
    /// Whether this event is routed to error listeners.
    fn is_error(&self) -> bool;

    /// Short stable name, used as a log field and metric label.
    fn kind(&self) -> &'static str;
}

/// Receives events of type `E`.
pub trait EventListener<E>: Send + Sync {
    fn on_event(&self, event: &E) -> ListenerResult;
}

impl<E, F> EventListener<E> for F
where
    F: Fn(&E) -> ListenerResult + Send + Sync,
{
    fn on_event(&self, event: &E) -> ListenerResult {
        self(event)
    }
}
