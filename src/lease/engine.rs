//! Secret lease lifecycle.
//!
//! Every registered secret owns one entry holding an immutable
//! [`SecretSnapshot`] (lease plus data), at most one scheduled task and a
//! lock serializing renewal, rotation and removal of that entry. Entries are
//! independent of each other.

use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

use super::requested::RequestedSecret;
use super::strategy::LeaseStrategy;
use crate::config::LeaseConfig;
use crate::domain::{Lease, SecretData, SecretHandle, SecretResponse};
use crate::errors::{LifecycleError, Result};
use crate::events::{
    EventListener, EventMulticaster, LeaseCreated, LeaseEvent, LeaseFailure, LeaseRenewed,
    LeaseRotated, ListenerId, SecretLeaseEvent, SecretNotFound,
};
use crate::observability::LifecycleMetrics;
use crate::scheduling::{RefreshTrigger, RenewalScheduler, ScheduledTask, MIN_RENEWAL_DELAY};
use crate::transport::LeaseTransport;

/// A lease together with the secret data it was issued with.
#[derive(Debug, Clone)]
pub struct SecretSnapshot {
    lease: Lease,
    data: Arc<SecretData>,
}

impl SecretSnapshot {
    fn from_response(response: SecretResponse) -> Self {
        Self { lease: response.lease, data: Arc::new(response.data) }
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn data(&self) -> &Arc<SecretData> {
        &self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseAction {
    Renew,
    Expire,
}

impl LeaseAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Renew => "renew",
            Self::Expire => "expire",
        }
    }
}

struct LeaseEntry {
    handle: SecretHandle,
    secret: RequestedSecret,
    snapshot: RwLock<Option<Arc<SecretSnapshot>>>,
    task: Mutex<Option<ScheduledTask>>,
    op: tokio::sync::Mutex<()>,
    removed: AtomicBool,
}

impl LeaseEntry {
    fn new(handle: SecretHandle, secret: RequestedSecret) -> Self {
        Self {
            handle,
            secret,
            snapshot: RwLock::new(None),
            task: Mutex::new(None),
            op: tokio::sync::Mutex::new(()),
            removed: AtomicBool::new(false),
        }
    }

    fn path(&self) -> &str {
        self.secret.path()
    }

    fn snapshot(&self) -> Option<Arc<SecretSnapshot>> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_snapshot(&self, snapshot: Option<Arc<SecretSnapshot>>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn is_current(&self, expected: &Arc<SecretSnapshot>) -> bool {
        matches!(self.snapshot(), Some(current) if Arc::ptr_eq(&current, expected))
    }

    fn replace_task(&self, task: ScheduledTask) {
        let previous = self.task.lock().unwrap_or_else(PoisonError::into_inner).replace(task);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn cancel_task(&self) {
        let previous = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn lease_event(&self, lease: Lease) -> SecretLeaseEvent {
        SecretLeaseEvent { handle: self.handle.clone(), path: self.path().to_string(), lease }
    }

    fn failure(&self, lease: Lease, error: LifecycleError) -> LeaseEvent {
        LeaseEvent::Error(LeaseFailure {
            handle: self.handle.clone(),
            path: self.path().to_string(),
            lease,
            error,
        })
    }

    fn not_found(&self) -> LeaseEvent {
        LeaseEvent::NotFound(SecretNotFound {
            handle: self.handle.clone(),
            path: self.path().to_string(),
        })
    }
}

struct LeaseInner {
    transport: Arc<dyn LeaseTransport>,
    scheduler: Arc<dyn RenewalScheduler>,
    trigger: Arc<dyn RefreshTrigger>,
    strategy: LeaseStrategy,
    renewal_increment: Option<Duration>,
    entries: DashMap<SecretHandle, Arc<LeaseEntry>>,
    events: EventMulticaster<LeaseEvent>,
    metrics: LifecycleMetrics,
    destroyed: AtomicBool,
}

/// Builder for [`LeaseEngine`].
pub struct LeaseEngineBuilder {
    transport: Arc<dyn LeaseTransport>,
    scheduler: Arc<dyn RenewalScheduler>,
    trigger: Arc<dyn RefreshTrigger>,
    strategy: LeaseStrategy,
    renewal_increment: Option<Duration>,
    metrics: LifecycleMetrics,
}

impl LeaseEngineBuilder {
    /// Apply lead time, threshold, jitter, strategy and increment settings.
    pub fn config(mut self, config: &LeaseConfig) -> Self {
        self.trigger = Arc::new(config.trigger());
        self.strategy = config.strategy;
        self.renewal_increment = config.renewal_increment_seconds.map(Duration::from_secs);
        self
    }

    pub fn trigger(mut self, trigger: Arc<dyn RefreshTrigger>) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn strategy(mut self, strategy: LeaseStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fixed increment to request on renewal. Defaults to the lease's own duration.
    pub fn renewal_increment(mut self, increment: Duration) -> Self {
        self.renewal_increment = Some(increment);
        self
    }

    pub fn metrics(mut self, metrics: LifecycleMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> LeaseEngine {
        LeaseEngine {
            inner: Arc::new(LeaseInner {
                transport: self.transport,
                scheduler: self.scheduler,
                trigger: self.trigger,
                strategy: self.strategy,
                renewal_increment: self.renewal_increment,
                entries: DashMap::new(),
                events: EventMulticaster::new(),
                metrics: self.metrics,
                destroyed: AtomicBool::new(false),
            }),
        }
    }
}

/// Keeps the leases of registered secrets alive and rotates secrets whose
/// lease is lost.
#[derive(Clone)]
pub struct LeaseEngine {
    inner: Arc<LeaseInner>,
}

impl LeaseEngine {
    pub fn builder(
        transport: Arc<dyn LeaseTransport>,
        scheduler: Arc<dyn RenewalScheduler>,
    ) -> LeaseEngineBuilder {
        let defaults = LeaseConfig::default();
        LeaseEngineBuilder {
            transport,
            scheduler,
            trigger: Arc::new(defaults.trigger()),
            strategy: defaults.strategy,
            renewal_increment: defaults.renewal_increment_seconds.map(Duration::from_secs),
            metrics: LifecycleMetrics::new(),
        }
    }

    /// Register a secret and fetch it right away.
    ///
    /// A missing secret or a failed fetch is published and the handle is still
    /// returned, except in `Immediate` mode where the failure is returned and
    /// nothing is registered.
    pub async fn add_requested_secret(&self, secret: RequestedSecret) -> Result<SecretHandle> {
        self.inner.add(secret).await
    }

    /// Unregister a secret, cancelling its schedule and revoking its lease.
    /// Returns `false` if the handle was not registered.
    pub async fn remove_requested_secret(&self, handle: &SecretHandle) -> bool {
        self.inner.remove(handle).await
    }

    /// Fetch the secret again now. On failure the previous snapshot stays
    /// in place.
    pub async fn rotate(&self, handle: &SecretHandle) -> Result<()> {
        self.inner.rotate(handle).await
    }

    /// Current lease and data of a secret.
    pub fn snapshot(&self, handle: &SecretHandle) -> Option<Arc<SecretSnapshot>> {
        self.inner.entries.get(handle).and_then(|entry| entry.snapshot())
    }

    pub fn secret(&self, handle: &SecretHandle) -> Option<Arc<SecretData>> {
        self.snapshot(handle).map(|snapshot| Arc::clone(&snapshot.data))
    }

    pub fn lease(&self, handle: &SecretHandle) -> Option<Lease> {
        self.snapshot(handle).map(|snapshot| snapshot.lease.clone())
    }

    pub fn requested_secret(&self, handle: &SecretHandle) -> Option<RequestedSecret> {
        self.inner.entries.get(handle).map(|entry| entry.secret.clone())
    }

    pub fn handles(&self) -> Vec<SecretHandle> {
        self.inner.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Unregister every secret, revoking leases best-effort. Later
    /// registrations fail with [`LifecycleError::Destroyed`].
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles = self.handles();
        let count = handles.len();
        join_all(handles.iter().map(|handle| self.inner.remove(handle))).await;
        info!(secrets = count, "Lease engine destroyed");
    }

    pub fn add_lease_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener<LeaseEvent> + 'static,
    {
        self.inner.events.add_listener(listener)
    }

    pub fn remove_lease_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_listener(id)
    }

    pub fn add_error_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener<LeaseEvent> + 'static,
    {
        self.inner.events.add_error_listener(listener)
    }

    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_error_listener(id)
    }
}

impl std::fmt::Debug for LeaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseEngine")
            .field("secrets", &self.len())
            .field("strategy", &self.inner.strategy)
            .field("trigger", &self.inner.trigger)
            .finish()
    }
}

impl LeaseInner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Whether results for `entry` should still be published and scheduled.
    fn is_live(&self, entry: &LeaseEntry) -> bool {
        !self.is_destroyed() && !entry.removed.load(Ordering::SeqCst)
    }

    fn publish(&self, event: LeaseEvent) {
        self.events.multicast_event(&event);
    }

    fn update_gauge(&self) {
        self.metrics.set_managed_secrets(self.entries.len());
    }

    async fn add(self: &Arc<Self>, secret: RequestedSecret) -> Result<SecretHandle> {
        if self.is_destroyed() {
            return Err(LifecycleError::Destroyed);
        }

        let handle = SecretHandle::new();
        let immediate = secret.is_immediate();
        let entry = Arc::new(LeaseEntry::new(handle.clone(), secret));
        let span =
            crate::lease_span!("register", entry.path(), mode = entry.secret.mode().as_str());
        let op = entry.op.lock().await;

        let result = entry.secret.fetcher().fetch(entry.path()).instrument(span).await;
        let fetched = match result {
            Ok(Some(response)) => Ok(Arc::new(SecretSnapshot::from_response(response))),
            Ok(None) => {
                warn!(path = entry.path(), "Secret not found");
                if immediate {
                    return Err(LifecycleError::not_found(entry.path()));
                }
                Err(None)
            }
            Err(error) => {
                warn!(path = entry.path(), error = %error, "Initial secret fetch failed");
                if immediate {
                    return Err(error);
                }
                Err(Some(error))
            }
        };

        if let Ok(snapshot) = &fetched {
            entry.set_snapshot(Some(Arc::clone(snapshot)));
        }
        self.register(&entry);
        // `destroy` sets the flag before collecting handles, so an entry
        // registered after that point is only seen here.
        if self.is_destroyed() {
            drop(op);
            self.remove(&handle).await;
            return Err(LifecycleError::Destroyed);
        }

        match fetched {
            Ok(snapshot) => {
                info!(path = entry.path(), lease = %snapshot.lease, "Secret registered");
                self.publish(LeaseEvent::Created(LeaseCreated {
                    handle: handle.clone(),
                    path: entry.path().to_string(),
                    lease: snapshot.lease.clone(),
                    data: Arc::clone(&snapshot.data),
                }));
                self.schedule(&entry, &snapshot);
            }
            Err(None) => self.publish(entry.not_found()),
            Err(Some(error)) => self.publish(entry.failure(Lease::none(), error)),
        }
        Ok(handle)
    }

    fn register(&self, entry: &Arc<LeaseEntry>) {
        self.entries.insert(entry.handle.clone(), Arc::clone(entry));
        self.update_gauge();
    }

    /// Schedule the next action for `snapshot`, or nothing if the lease
    /// needs no care.
    fn schedule(self: &Arc<Self>, entry: &Arc<LeaseEntry>, snapshot: &Arc<SecretSnapshot>) {
        if !self.is_live(entry) {
            return;
        }

        let lease = &snapshot.lease;
        let duration = lease.lease_duration();
        let renewable = lease.has_lease_id() && lease.is_renewable();
        if duration.is_zero() || (!renewable && !entry.secret.is_rotating()) {
            debug!(path = entry.path(), lease = %lease, "Lease needs no renewal");
            entry.cancel_task();
            return;
        }

        let (delay, action) = if duration <= self.trigger.valid_ttl_threshold(duration) {
            warn!(
                path = entry.path(),
                ttl_secs = duration.as_secs(),
                "Lease TTL is below the valid threshold; treating it as expired"
            );
            (MIN_RENEWAL_DELAY, LeaseAction::Expire)
        } else {
            let Some(delay) = self.trigger.next_execution(lease.remaining_ttl()) else {
                entry.cancel_task();
                return;
            };
            let action = if renewable { LeaseAction::Renew } else { LeaseAction::Expire };
            (delay, action)
        };
        self.schedule_action(entry, snapshot, delay, action);
    }

    fn schedule_action(
        self: &Arc<Self>,
        entry: &Arc<LeaseEntry>,
        snapshot: &Arc<SecretSnapshot>,
        delay: Duration,
        action: LeaseAction,
    ) {
        let weak = Arc::downgrade(self);
        let task_entry = Arc::clone(entry);
        let expected = Arc::clone(snapshot);
        let span = crate::lease_span!(action.as_str(), entry.path());
        let task = self.scheduler.schedule(
            delay,
            Box::pin(
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.run(task_entry, expected, action).await;
                    }
                }
                .instrument(span),
            ),
        );
        debug!(
            path = entry.path(),
            action = action.as_str(),
            delay_secs = delay.as_secs(),
            "Scheduled lease action"
        );
        entry.replace_task(task);
    }

    async fn run(
        self: Arc<Self>,
        entry: Arc<LeaseEntry>,
        expected: Arc<SecretSnapshot>,
        action: LeaseAction,
    ) {
        let _op = entry.op.lock().await;
        if !self.is_live(&entry) || !entry.is_current(&expected) {
            debug!(path = entry.path(), "Skipping stale lease action");
            return;
        }

        match action {
            LeaseAction::Renew => self.renew_locked(&entry, expected).await,
            LeaseAction::Expire => self.expire_locked(&entry, &expected).await,
        }
    }

    async fn renew_locked(self: &Arc<Self>, entry: &Arc<LeaseEntry>, current: Arc<SecretSnapshot>) {
        let increment = self.renewal_increment.unwrap_or_else(|| current.lease.lease_duration());
        let result = self.transport.renew(&current.lease, increment).await;
        self.metrics.record_renewal("lease", result.is_ok());

        match result {
            Ok(renewed) => {
                let snapshot =
                    Arc::new(SecretSnapshot { lease: renewed, data: Arc::clone(&current.data) });
                entry.set_snapshot(Some(Arc::clone(&snapshot)));
                if !self.is_live(entry) {
                    return;
                }
                debug!(path = entry.path(), lease = %snapshot.lease, "Lease renewed");
                self.publish(LeaseEvent::Renewed(LeaseRenewed {
                    handle: entry.handle.clone(),
                    path: entry.path().to_string(),
                    previous: current.lease.clone(),
                    lease: snapshot.lease.clone(),
                }));
                self.schedule(entry, &snapshot);
            }
            Err(error) => {
                if !self.is_live(entry) {
                    return;
                }
                warn!(
                    path = entry.path(),
                    error = %error,
                    strategy = self.strategy.as_str(),
                    "Lease renewal failed"
                );
                self.publish(entry.failure(current.lease.clone(), error.clone()));

                if self.strategy.retains(&error) {
                    let remaining = current.lease.remaining_ttl();
                    if let Some(delay) = self.trigger.next_execution(remaining) {
                        if remaining > delay {
                            debug!(
                                path = entry.path(),
                                retry_in_secs = delay.as_secs(),
                                "Keeping lease and retrying renewal"
                            );
                            self.schedule_action(entry, &current, delay, LeaseAction::Renew);
                            return;
                        }
                    }
                }
                self.expire_locked(entry, &current).await;
            }
        }
    }

    /// The lease is gone: report it and rotate if the secret asks for it.
    async fn expire_locked(
        self: &Arc<Self>,
        entry: &Arc<LeaseEntry>,
        current: &Arc<SecretSnapshot>,
    ) {
        info!(path = entry.path(), lease = %current.lease, "Lease expired");
        self.publish(LeaseEvent::Expired(entry.lease_event(current.lease.clone())));

        if !entry.secret.is_rotating() {
            entry.cancel_task();
            entry.set_snapshot(None);
            return;
        }

        if self.rotate_locked(entry, Some(current)).await.is_err() {
            entry.cancel_task();
            if self.is_live(entry) {
                entry.set_snapshot(None);
            }
        }
    }

    /// Fetch the secret and install it. Callers hold the entry's op lock.
    ///
    /// On failure the installed snapshot is left untouched.
    async fn rotate_locked(
        self: &Arc<Self>,
        entry: &Arc<LeaseEntry>,
        previous: Option<&Arc<SecretSnapshot>>,
    ) -> Result<()> {
        let previous_lease =
            previous.map(|snapshot| snapshot.lease.clone()).unwrap_or_else(Lease::none);
        let result = entry.secret.fetcher().fetch(entry.path()).await;
        self.metrics.record_rotation(entry.secret.mode(), matches!(result, Ok(Some(_))));

        match result {
            Ok(Some(response)) => {
                let snapshot = Arc::new(SecretSnapshot::from_response(response));
                entry.set_snapshot(Some(Arc::clone(&snapshot)));
                if !self.is_live(entry) {
                    return Ok(());
                }
                info!(
                    path = entry.path(),
                    previous = %previous_lease,
                    lease = %snapshot.lease,
                    "Secret rotated"
                );
                self.publish(LeaseEvent::Rotated(LeaseRotated {
                    handle: entry.handle.clone(),
                    path: entry.path().to_string(),
                    previous: previous_lease,
                    lease: snapshot.lease.clone(),
                    data: Arc::clone(&snapshot.data),
                }));
                self.schedule(entry, &snapshot);
                Ok(())
            }
            Ok(None) => {
                if self.is_live(entry) {
                    warn!(path = entry.path(), "Secret not found during rotation");
                    self.publish(entry.not_found());
                }
                Err(LifecycleError::not_found(entry.path()))
            }
            Err(error) => {
                if self.is_live(entry) {
                    warn!(path = entry.path(), error = %error, "Secret rotation failed");
                    self.publish(entry.failure(previous_lease, error.clone()));
                }
                Err(error)
            }
        }
    }

    async fn rotate(self: &Arc<Self>, handle: &SecretHandle) -> Result<()> {
        if self.is_destroyed() {
            return Err(LifecycleError::Destroyed);
        }
        let entry = self
            .entries
            .get(handle)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LifecycleError::not_found(handle.as_str()))?;

        let _op = entry.op.lock().await;
        if !self.is_live(&entry) {
            return Err(LifecycleError::not_found(handle.as_str()));
        }
        let previous = entry.snapshot();
        self.rotate_locked(&entry, previous.as_ref())
            .instrument(crate::lease_span!("rotate", entry.path()))
            .await
    }

    async fn remove(&self, handle: &SecretHandle) -> bool {
        let Some((_, entry)) = self.entries.remove(handle) else {
            return false;
        };
        entry.removed.store(true, Ordering::SeqCst);
        entry.cancel_task();
        self.update_gauge();

        let _op = entry.op.lock().await;
        let snapshot = entry.snapshot.write().unwrap_or_else(PoisonError::into_inner).take();
        let Some(snapshot) = snapshot.filter(|snapshot| snapshot.lease.has_lease_id()) else {
            debug!(path = entry.path(), "Secret unregistered");
            return true;
        };

        match self.transport.revoke(&snapshot.lease).await {
            Ok(()) => {
                info!(path = entry.path(), lease = %snapshot.lease, "Lease revoked");
                self.publish(LeaseEvent::Revoked(entry.lease_event(snapshot.lease.clone())));
            }
            Err(error) => {
                warn!(path = entry.path(), error = %error, "Cannot revoke lease");
                self.publish(entry.failure(snapshot.lease.clone(), error));
            }
        }
        true
    }
}

impl Drop for LeaseInner {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.cancel_task();
        }
    }
}
