//! Ready-made observers for lifecycle events.

use tracing::{debug, info, warn};

use super::{AuthenticationEvent, EventListener, LeaseEvent, LifecycleEvent, ListenerResult};
use crate::observability::LifecycleMetrics;

/// Logs every event it receives.
///
/// Register it both as a regular and as an error listener to see everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl EventListener<AuthenticationEvent> for LoggingListener {
    fn on_event(&self, event: &AuthenticationEvent) -> ListenerResult {
        match event {
            AuthenticationEvent::Created(e) => info!(
                kind = e.credential.kind().as_str(),
                ttl_secs = e.credential.lease_duration().as_secs(),
                renewable = e.credential.is_renewable(),
                "Vault session established"
            ),
            AuthenticationEvent::Renewed(e) => debug!(
                ttl_secs = e.credential.lease_duration().as_secs(),
                "Vault token renewed"
            ),
            AuthenticationEvent::Error(e) => warn!(
                error = %e.error,
                error_kind = e.error.kind(),
                "Vault session error"
            ),
            AuthenticationEvent::LoginTokenExpired(e) => warn!(
                remaining_secs = e.credential.remaining_ttl().as_secs(),
                "Vault login token expired and was dropped"
            ),
            AuthenticationEvent::Revoked(_) => info!("Vault token revoked"),
        }
        Ok(())
    }
}

impl EventListener<LeaseEvent> for LoggingListener {
    fn on_event(&self, event: &LeaseEvent) -> ListenerResult {
        let path = event.path();
        match event {
            LeaseEvent::Created(e) => {
                info!(path, lease = %e.lease, "Secret lease created")
            }
            LeaseEvent::Renewed(e) => debug!(path, lease = %e.lease, "Secret lease renewed"),
            LeaseEvent::Rotated(e) => info!(
                path,
                previous = %e.previous,
                lease = %e.lease,
                "Secret rotated"
            ),
            LeaseEvent::Expired(e) => warn!(path, lease = %e.lease, "Secret lease expired"),
            LeaseEvent::Error(e) => warn!(
                path,
                lease = %e.lease,
                error = %e.error,
                error_kind = e.error.kind(),
                "Secret lease error"
            ),
            LeaseEvent::NotFound(_) => warn!(path, "Secret not found"),
            LeaseEvent::Revoked(e) => info!(path, lease = %e.lease, "Secret lease revoked"),
        }
        Ok(())
    }
}

/// Counts events through [`LifecycleMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricsListener {
    metrics: LifecycleMetrics,
}

impl MetricsListener {
    pub fn new(metrics: LifecycleMetrics) -> Self {
        Self { metrics }
    }
}

impl EventListener<AuthenticationEvent> for MetricsListener {
    fn on_event(&self, event: &AuthenticationEvent) -> ListenerResult {
        self.metrics.record_authentication_event(event.kind());
        Ok(())
    }
}

impl EventListener<LeaseEvent> for MetricsListener {
    fn on_event(&self, event: &LeaseEvent) -> ListenerResult {
        self.metrics.record_lease_event(event.kind());
        Ok(())
    }
}
