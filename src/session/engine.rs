//! Token session lifecycle.
//!
//! [`SessionEngine`] owns the current credential. Readers get the installed
//! credential without waiting on background renewals; only a caller that
//! finds no usable credential waits, and concurrent callers share one login.
//!
//! ```text
//! Unauthenticated --login ok--> Valid(scheduled) --renew ok--> Valid(scheduled)
//!        ^                            |
//!        |                            +--transient failure, time left--> Valid(retry scheduled)
//!        +---- terminal failure ------+--re-login supported--> login again
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::config::SessionConfig;
use crate::domain::{Credential, CredentialKind};
use crate::errors::{LifecycleError, Result};
use crate::events::{AuthenticationEvent, EventListener, EventMulticaster, ListenerId};
use crate::observability::LifecycleMetrics;
use crate::scheduling::{RefreshTrigger, RenewalScheduler, ScheduledTask};
use crate::transport::{ClientAuthenticator, CredentialTransport, TokenSource};

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Destroyed,
}

/// Outcome bookkeeping for the single in-flight login.
#[derive(Default)]
struct LoginState {
    /// Error of the most recent login, if it failed.
    last_error: Option<LifecycleError>,
}

struct SessionInner {
    authenticator: Arc<dyn ClientAuthenticator>,
    transport: Arc<dyn CredentialTransport>,
    scheduler: Arc<dyn RenewalScheduler>,
    trigger: Arc<dyn RefreshTrigger>,
    self_lookup: bool,
    events: EventMulticaster<AuthenticationEvent>,
    metrics: LifecycleMetrics,
    current: RwLock<Option<Arc<Credential>>>,
    task: Mutex<Option<ScheduledTask>>,
    login: tokio::sync::Mutex<LoginState>,
    /// Number of finished logins. Only changes while `login` is held.
    logins_completed: AtomicU64,
    destroyed: AtomicBool,
}

/// Builder for [`SessionEngine`].
pub struct SessionEngineBuilder {
    authenticator: Arc<dyn ClientAuthenticator>,
    transport: Arc<dyn CredentialTransport>,
    scheduler: Arc<dyn RenewalScheduler>,
    trigger: Arc<dyn RefreshTrigger>,
    self_lookup: bool,
    metrics: LifecycleMetrics,
}

impl SessionEngineBuilder {
    /// Apply lead time, threshold, jitter and self-lookup settings.
    pub fn config(mut self, config: &SessionConfig) -> Self {
        self.trigger = Arc::new(config.trigger());
        self.self_lookup = config.self_lookup;
        self
    }

    pub fn trigger(mut self, trigger: Arc<dyn RefreshTrigger>) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn self_lookup(mut self, enabled: bool) -> Self {
        self.self_lookup = enabled;
        self
    }

    pub fn metrics(mut self, metrics: LifecycleMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> SessionEngine {
        SessionEngine {
            inner: Arc::new(SessionInner {
                authenticator: self.authenticator,
                transport: self.transport,
                scheduler: self.scheduler,
                trigger: self.trigger,
                self_lookup: self.self_lookup,
                events: EventMulticaster::new(),
                metrics: self.metrics,
                current: RwLock::new(None),
                task: Mutex::new(None),
                login: tokio::sync::Mutex::new(LoginState::default()),
                logins_completed: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
            }),
        }
    }
}

/// Keeps a Vault token alive and hands it out to concurrent callers.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<SessionInner>,
}

impl SessionEngine {
    pub fn builder(
        authenticator: Arc<dyn ClientAuthenticator>,
        transport: Arc<dyn CredentialTransport>,
        scheduler: Arc<dyn RenewalScheduler>,
    ) -> SessionEngineBuilder {
        let defaults = SessionConfig::default();
        SessionEngineBuilder {
            authenticator,
            transport,
            scheduler,
            trigger: Arc::new(defaults.trigger()),
            self_lookup: defaults.self_lookup,
            metrics: LifecycleMetrics::new(),
        }
    }

    /// Current valid credential, logging in if there is none.
    ///
    /// Concurrent callers on an unauthenticated session wait for a single
    /// login and all receive its outcome.
    pub async fn token(&self) -> Result<Arc<Credential>> {
        self.inner.acquire().await
    }

    /// Installed credential, without logging in.
    pub fn current_credential(&self) -> Option<Arc<Credential>> {
        self.inner.usable_credential()
    }

    pub fn state(&self) -> SessionState {
        if self.inner.is_destroyed() {
            SessionState::Destroyed
        } else if self.inner.usable_credential().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Drop the current credential, revoking it if this session obtained it
    /// through a login. Revocation failures are published, never returned.
    pub async fn revoke(&self) {
        self.inner.revoke().await;
    }

    /// Revoke and shut down. Later calls to [`token`](Self::token) fail with
    /// [`LifecycleError::Destroyed`].
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.revoke().await;
        info!("Vault session destroyed");
    }

    pub fn add_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener<AuthenticationEvent> + 'static,
    {
        self.inner.events.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_listener(id)
    }

    pub fn add_error_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener<AuthenticationEvent> + 'static,
    {
        self.inner.events.add_error_listener(listener)
    }

    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_error_listener(id)
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("state", &self.state())
            .field("trigger", &self.inner.trigger)
            .finish()
    }
}

#[async_trait]
impl TokenSource for SessionEngine {
    async fn token(&self) -> Result<Arc<Credential>> {
        SessionEngine::token(self).await
    }
}

impl SessionInner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(LifecycleError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn current(&self) -> Option<Arc<Credential>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The installed credential unless it has already run out.
    fn usable_credential(&self) -> Option<Arc<Credential>> {
        self.current().filter(|credential| !credential.is_expiring(Duration::ZERO))
    }

    fn publish(&self, event: AuthenticationEvent) {
        self.events.multicast_event(&event);
    }

    async fn acquire(self: &Arc<Self>) -> Result<Arc<Credential>> {
        self.ensure_active()?;
        if let Some(credential) = self.usable_credential() {
            return Ok(credential);
        }

        let observed = self.logins_completed.load(Ordering::SeqCst);
        let mut login = self.login.lock().await;
        self.ensure_active()?;

        if let Some(credential) = self.usable_credential() {
            return Ok(credential);
        }
        // A login finished while we were waiting and produced no credential:
        // share its error instead of starting another one.
        if self.logins_completed.load(Ordering::SeqCst) > observed {
            if let Some(ref error) = login.last_error {
                return Err(error.clone());
            }
        }

        self.drop_expired();
        let result = self.login_locked().await;
        login.last_error = result.as_ref().err().cloned();
        self.logins_completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Clear a credential that ran out without being renewed.
    fn drop_expired(&self) {
        let expired = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(credential) if credential.is_expiring(Duration::ZERO) => current.take(),
                _ => None,
            }
        };
        if let Some(credential) = expired {
            warn!("Vault token expired before it could be renewed");
            self.cancel_task();
            self.publish(AuthenticationEvent::login_token_expired(credential));
        }
    }

    /// Perform a login. Callers hold the `login` mutex.
    async fn login_locked(self: &Arc<Self>) -> Result<Arc<Credential>> {
        let started = Instant::now();
        let result = self
            .authenticator
            .login()
            .instrument(crate::session_span!("login"))
            .await;
        self.metrics.record_login(result.is_ok(), started.elapsed());

        let credential = match result {
            Ok(credential) => credential,
            Err(error) => {
                warn!(error = %error, "Vault login failed");
                self.publish(AuthenticationEvent::error(error.clone(), None));
                return Err(error);
            }
        };

        let credential = Arc::new(self.augment(credential).await);
        if !self.install(&credential) {
            debug!("Login finished after the session was destroyed; revoking its token");
            self.revoke_credential(credential).await;
            return Err(LifecycleError::Destroyed);
        }

        info!(
            kind = credential.kind().as_str(),
            ttl_secs = credential.lease_duration().as_secs(),
            renewable = credential.is_renewable(),
            "Vault login succeeded"
        );
        self.publish(AuthenticationEvent::created(Arc::clone(&credential)));
        self.schedule_renewal(&credential);
        Ok(credential)
    }

    /// Install a fresh login unless the session was destroyed. The flag is
    /// read under the write lock that `revoke` takes, so a credential installed
    /// here is always seen by a concurrent `destroy`.
    fn install(&self, credential: &Arc<Credential>) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if self.is_destroyed() {
            return false;
        }
        *current = Some(Arc::clone(credential));
        true
    }

    /// Fill in TTL and renewability of an externally supplied token.
    async fn augment(&self, credential: Credential) -> Credential {
        let unknown = credential.kind() == CredentialKind::External
            && credential.lease_duration().is_zero()
            && !credential.is_renewable();
        if !self.self_lookup || !unknown {
            return credential;
        }

        match self.transport.lookup_self(&credential).await {
            Ok(lookup) => {
                debug!(
                    ttl_secs = lookup.ttl.as_secs(),
                    renewable = lookup.renewable,
                    "Token self-lookup succeeded"
                );
                credential.with_lease(lookup.ttl, lookup.renewable)
            }
            Err(error) => {
                warn!(
                    error = %error,
                    "Cannot enhance token with self-lookup; treating it as non-renewable"
                );
                credential
            }
        }
    }

    /// Whether `credential` was issued with a TTL at or below the valid
    /// threshold. Such tokens are never renewed.
    fn is_below_threshold(&self, credential: &Credential) -> bool {
        let ttl = credential.lease_duration();
        !ttl.is_zero() && ttl <= self.trigger.valid_ttl_threshold(ttl)
    }

    /// Delay before renewing `credential`, if it should be renewed at all.
    fn renewal_delay(&self, credential: &Credential) -> Option<Duration> {
        if !credential.needs_renewal() || self.is_below_threshold(credential) {
            return None;
        }
        self.trigger.next_execution(credential.remaining_ttl())
    }

    fn schedule_renewal(self: &Arc<Self>, credential: &Arc<Credential>) {
        if self.is_destroyed() {
            return;
        }
        if credential.needs_renewal() && self.is_below_threshold(credential) {
            self.schedule_expiry(credential);
            return;
        }
        let Some(delay) = self.renewal_delay(credential) else {
            debug!("Token is not renewable; no renewal scheduled");
            return;
        };

        let weak: Weak<SessionInner> = Arc::downgrade(self);
        let expected = Arc::clone(credential);
        let task = self.scheduler.schedule(
            delay,
            Box::pin(
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.renew(expected).await;
                    }
                }
                .instrument(crate::session_span!("renew")),
            ),
        );
        debug!(delay_secs = delay.as_secs(), "Scheduled token renewal");
        self.replace_task(task);
    }

    /// Drop `credential` when it runs out instead of renewing it.
    fn schedule_expiry(self: &Arc<Self>, credential: &Arc<Credential>) {
        let delay = credential.remaining_ttl();
        warn!(
            ttl_secs = credential.lease_duration().as_secs(),
            "Token TTL is below the valid threshold; it will not be renewed"
        );

        let weak: Weak<SessionInner> = Arc::downgrade(self);
        let expected = Arc::clone(credential);
        let task = self.scheduler.schedule(
            delay,
            Box::pin(
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.expire(&expected);
                    }
                }
                .instrument(crate::session_span!("expire")),
            ),
        );
        self.replace_task(task);
    }

    fn expire(&self, expected: &Arc<Credential>) {
        if self.is_destroyed() {
            return;
        }
        if self.swap_if_current(expected, None) {
            info!("Vault token reached the end of its TTL");
            self.publish(AuthenticationEvent::login_token_expired(Arc::clone(expected)));
        }
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

    /// Install `replacement` if `expected` is still current.
    fn swap_if_current(
        &self,
        expected: &Arc<Credential>,
        replacement: Option<Arc<Credential>>,
    ) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(installed) if Arc::ptr_eq(installed, expected) => {
                *current = replacement;
                true
            }
            _ => false,
        }
    }

    async fn renew(self: Arc<Self>, expected: Arc<Credential>) {
        if self.is_destroyed() {
            return;
        }
        match self.current() {
            Some(current) if Arc::ptr_eq(&current, &expected) => {}
            _ => {
                debug!("Token was replaced; skipping stale renewal");
                return;
            }
        }

        let result = self.transport.renew_self(&expected).await;
        if self.is_destroyed() {
            debug!("Discarding renewal result of a destroyed session");
            return;
        }
        self.metrics.record_renewal("session", result.is_ok());

        match result {
            Ok(renewed) => self.on_renewed(&expected, Arc::new(renewed)),
            Err(error) => self.on_renewal_failure(&expected, error).await,
        }
    }

    fn on_renewed(self: &Arc<Self>, previous: &Arc<Credential>, renewed: Arc<Credential>) {
        let ttl = renewed.lease_duration();
        if self.is_below_threshold(&renewed) {
            warn!(
                ttl_secs = ttl.as_secs(),
                "Renewed token TTL is below the valid threshold; dropping it"
            );
            if self.swap_if_current(previous, None) {
                self.cancel_task();
                self.publish(AuthenticationEvent::login_token_expired(renewed));
            }
            return;
        }

        if !self.swap_if_current(previous, Some(Arc::clone(&renewed))) {
            debug!("Token was replaced during renewal; discarding result");
            return;
        }
        debug!(ttl_secs = ttl.as_secs(), "Vault token renewed");
        self.publish(AuthenticationEvent::renewed(Arc::clone(&renewed)));
        self.schedule_renewal(&renewed);
    }

    async fn on_renewal_failure(
        self: &Arc<Self>,
        current: &Arc<Credential>,
        error: LifecycleError,
    ) {
        warn!(error = %error, error_kind = error.kind(), "Vault token renewal failed");
        self.publish(AuthenticationEvent::error(error.clone(), Some(Arc::clone(current))));

        if error.is_transient() {
            let remaining = current.remaining_ttl();
            if let Some(delay) = self.renewal_delay(current) {
                if remaining > delay {
                    debug!(retry_in_secs = delay.as_secs(), "Keeping token and retrying renewal");
                    self.schedule_renewal(current);
                    return;
                }
            }
        }

        if !self.swap_if_current(current, None) {
            return;
        }
        self.cancel_task();

        if self.authenticator.supports_relogin() {
            info!("Token lost; logging in again");
            if let Err(error) = self.acquire().await {
                debug!(error = %error, "Re-login after renewal failure failed");
            }
        } else {
            self.publish(AuthenticationEvent::login_token_expired(Arc::clone(current)));
        }
    }

    async fn revoke(&self) {
        self.cancel_task();
        let previous = self.current.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(credential) = previous {
            self.revoke_credential(credential).await;
        }
    }

    /// Best-effort `revoke_self` for tokens this session logged in for.
    async fn revoke_credential(&self, credential: Arc<Credential>) {
        if !credential.is_login_token() {
            debug!("Dropping externally supplied token without revoking it");
            return;
        }

        match self.transport.revoke_self(&credential).await {
            Ok(()) => {
                info!("Vault token revoked");
                self.publish(AuthenticationEvent::revoked(credential));
            }
            Err(error) => {
                warn!(error = %error, "Cannot revoke Vault token");
                self.publish(AuthenticationEvent::error(error, Some(credential)));
            }
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::ManualScheduler;
    use crate::transport::mock::{MockAuthenticator, MockCredentialTransport};
    use crate::events::{LifecycleEvent, ListenerResult};
    use crate::transport::TokenLookup;

    struct Fixture {
        engine: SessionEngine,
        auth: Arc<MockAuthenticator>,
        transport: Arc<MockCredentialTransport>,
        scheduler: Arc<ManualScheduler>,
    }

    fn fixture(auth: MockAuthenticator) -> Fixture {
        let auth = Arc::new(auth);
        let transport = Arc::new(MockCredentialTransport::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let engine = SessionEngine::builder(
            Arc::clone(&auth) as Arc<dyn ClientAuthenticator>,
            Arc::clone(&transport) as Arc<dyn CredentialTransport>,
            Arc::clone(&scheduler) as Arc<dyn RenewalScheduler>,
        )
        .build();
        Fixture { engine, auth, transport, scheduler }
    }

    fn login_token(ttl_secs: u64) -> Credential {
        Credential::login("s.login", Duration::from_secs(ttl_secs), true)
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_schedules_renewal_before_expiry() {
        let f = fixture(MockAuthenticator::new(login_token(30)));

        let credential = f.engine.token().await.unwrap();
        assert_eq!(credential.lease_duration(), Duration::from_secs(30));
        assert_eq!(f.scheduler.pending_delays(), vec![Duration::from_secs(25)]);
        assert_eq!(f.engine.state(), SessionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_token_does_not_login_again() {
        let f = fixture(MockAuthenticator::new(login_token(30)));

        let first = f.engine.token().await.unwrap();
        let second = f.engine.token().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(f.auth.login_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_replaces_credential_and_reschedules() {
        let f = fixture(MockAuthenticator::new(login_token(30)));
        let first = f.engine.token().await.unwrap();

        assert!(f.scheduler.run_next().await);

        let renewed = f.engine.token().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &renewed));
        assert_eq!(f.transport.renew_count(), 1);
        assert_eq!(f.scheduler.pending_delays(), vec![Duration::from_secs(25)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_token_is_never_scheduled() {
        let f = fixture(MockAuthenticator::new(Credential::external("s.root")).with_relogin(false));

        let credential = f.engine.token().await.unwrap();
        assert!(credential.is_permanent());
        assert_eq!(f.scheduler.pending_count(), 0);
        assert_eq!(f.transport.lookup_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_lookup_makes_external_token_renewable() {
        let f = fixture(MockAuthenticator::new(Credential::external("s.external")));
        f.transport.set_lookup(Ok(TokenLookup { ttl: Duration::from_secs(60), renewable: true }));

        let credential = f.engine.token().await.unwrap();
        assert!(credential.needs_renewal());
        assert_eq!(credential.kind(), CredentialKind::External);
        assert_eq!(f.scheduler.pending_delays(), vec![Duration::from_secs(55)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_lookup_failure_is_swallowed() {
        let f = fixture(MockAuthenticator::new(Credential::external("s.external")));
        f.transport.set_lookup(Err(LifecycleError::permission_denied("permission denied")));

        let credential = f.engine.token().await.unwrap();
        assert!(!credential.needs_renewal());
        assert_eq!(f.scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_tokens_skip_self_lookup() {
        let f = fixture(MockAuthenticator::new(login_token(30)));
        f.engine.token().await.unwrap();
        assert_eq!(f.transport.lookup_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_keeps_token_and_retries() {
        let f = fixture(MockAuthenticator::new(login_token(30)));
        let first = f.engine.token().await.unwrap();

        tokio::time::advance(Duration::from_secs(25)).await;
        f.transport.push_renewal(Err(LifecycleError::transport("connection reset")));
        assert!(f.scheduler.run_next().await);

        let current = f.engine.current_credential().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(f.scheduler.pending_delays(), vec![Duration::from_secs(1)]);
        assert_eq!(f.auth.login_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_triggers_relogin() {
        let f = fixture(MockAuthenticator::new(login_token(30)));
        let first = f.engine.token().await.unwrap();

        f.transport.push_renewal(Err(LifecycleError::permission_denied("permission denied")));
        assert!(f.scheduler.run_next().await);

        let current = f.engine.current_credential().unwrap();
        assert!(!Arc::ptr_eq(&first, &current));
        assert_eq!(f.auth.login_count(), 2);
        assert_eq!(f.scheduler.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_without_relogin_drops_token() {
        let f = fixture(MockAuthenticator::new(login_token(30)).with_relogin(false));
        f.engine.token().await.unwrap();

        f.transport.push_renewal(Err(LifecycleError::not_found("token not found")));
        assert!(f.scheduler.run_next().await);

        assert!(f.engine.current_credential().is_none());
        assert_eq!(f.engine.state(), SessionState::Unauthenticated);
        assert_eq!(f.auth.login_count(), 1);

        f.engine.token().await.unwrap();
        assert_eq!(f.auth.login_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_below_threshold_expires_token() {
        let f = fixture(MockAuthenticator::new(login_token(30)).with_relogin(false));
        f.engine.token().await.unwrap();

        f.transport.push_renewal(Ok(Duration::from_secs(6)));
        assert!(f.scheduler.run_next().await);

        assert!(f.engine.current_credential().is_none());
        assert_eq!(f.scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_login_token_is_not_renewed() {
        // Default lead time 5s gives a 7s threshold.
        let f = fixture(MockAuthenticator::new(login_token(6)).with_relogin(false));
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        f.engine.add_listener(move |event: &AuthenticationEvent| -> ListenerResult {
            sink.lock().unwrap().push(event.kind());
            Ok(())
        });

        f.engine.token().await.unwrap();
        assert_eq!(f.scheduler.pending_delays(), vec![Duration::from_secs(6)]);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(f.scheduler.run_next().await);

        assert_eq!(f.transport.renew_count(), 0);
        assert!(f.engine.current_credential().is_none());
        assert_eq!(*kinds.lock().unwrap(), vec!["created", "login_token_expired"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_finishing_after_destroy_is_revoked() {
        let f = fixture(MockAuthenticator::new(login_token(30)).with_delay(Duration::from_secs(1)));
        let engine = f.engine.clone();
        let pending = tokio::spawn(async move { engine.token().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        f.engine.destroy().await;
        assert_eq!(f.transport.revoke_count(), 0);

        assert_eq!(pending.await.unwrap().unwrap_err(), LifecycleError::Destroyed);
        assert_eq!(f.transport.revoke_count(), 1);
        assert!(f.engine.current_credential().is_none());
        assert_eq!(f.scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_and_revokes() {
        let f = fixture(MockAuthenticator::new(login_token(30)));
        f.engine.token().await.unwrap();
        f.transport.fail_revoke(LifecycleError::transport("connection refused"));

        f.engine.destroy().await;

        assert_eq!(f.scheduler.pending_count(), 0);
        assert_eq!(f.transport.revoke_count(), 1);
        assert_eq!(f.engine.token().await.unwrap_err(), LifecycleError::Destroyed);
        assert_eq!(f.engine.state(), SessionState::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_token_is_not_revoked() {
        let f = fixture(MockAuthenticator::new(Credential::external("s.static")));
        f.engine.token().await.unwrap();

        f.engine.revoke().await;
        assert_eq!(f.transport.revoke_count(), 0);
        assert!(f.engine.current_credential().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_credential_is_never_returned() {
        let f = fixture(MockAuthenticator::new(login_token(30)));
        let first = f.engine.token().await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;

        let second = f.engine.token().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(f.auth.login_count(), 2);
    }
}
