//! Scripted collaborators for tests.
//!
//! Each mock answers from a queue of prepared results and falls back to a
//! sensible default once the queue is empty. Call counters let tests assert
//! how often the engines reached out.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{ClientAuthenticator, CredentialTransport, LeaseTransport, SecretFetcher, TokenLookup};
use crate::domain::{Credential, Lease, SecretResponse};
use crate::errors::{LifecycleError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Authenticator returning a fixed credential (re-issued on every login) or a
/// fixed error, unless a queued result is pending.
pub struct MockAuthenticator {
    default: Mutex<Result<Credential>>,
    queued: Mutex<VecDeque<Result<Credential>>>,
    relogin: bool,
    delay: Duration,
    logins: AtomicUsize,
}

impl MockAuthenticator {
    pub fn new(credential: Credential) -> Self {
        Self::with_default(Ok(credential))
    }

    pub fn failing(error: LifecycleError) -> Self {
        Self::with_default(Err(error))
    }

    fn with_default(default: Result<Credential>) -> Self {
        Self {
            default: Mutex::new(default),
            queued: Mutex::new(VecDeque::new()),
            relogin: true,
            delay: Duration::ZERO,
            logins: AtomicUsize::new(0),
        }
    }

    pub fn with_relogin(mut self, relogin: bool) -> Self {
        self.relogin = relogin;
        self
    }

    /// Make every login take `delay` (tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_result(&self, result: Result<Credential>) {
        lock(&self.queued).push_back(result);
    }

    pub fn set_default(&self, result: Result<Credential>) {
        *lock(&self.default) = result;
    }

    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientAuthenticator for MockAuthenticator {
    async fn login(&self) -> Result<Credential> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(result) = lock(&self.queued).pop_front() {
            return result;
        }
        // Re-issue so every login gets a fresh issue time.
        lock(&self.default)
            .clone()
            .map(|credential| {
                credential.with_lease(credential.lease_duration(), credential.is_renewable())
            })
    }

    fn supports_relogin(&self) -> bool {
        self.relogin
    }
}

/// Token transport that renews with the current TTL unless told otherwise.
pub struct MockCredentialTransport {
    renewals: Mutex<VecDeque<Result<Duration>>>,
    lookup: Mutex<Result<TokenLookup>>,
    revoke_error: Mutex<Option<LifecycleError>>,
    renew_delay: Duration,
    renew_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl Default for MockCredentialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCredentialTransport {
    pub fn new() -> Self {
        Self {
            renewals: Mutex::new(VecDeque::new()),
            lookup: Mutex::new(Ok(TokenLookup { ttl: Duration::ZERO, renewable: false })),
            revoke_error: Mutex::new(None),
            renew_delay: Duration::ZERO,
            renew_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_renew_delay(mut self, delay: Duration) -> Self {
        self.renew_delay = delay;
        self
    }

    /// Queue the outcome of the next renewal: the granted TTL or an error.
    pub fn push_renewal(&self, result: Result<Duration>) {
        lock(&self.renewals).push_back(result);
    }

    pub fn set_lookup(&self, result: Result<TokenLookup>) {
        *lock(&self.lookup) = result;
    }

    pub fn fail_revoke(&self, error: LifecycleError) {
        *lock(&self.revoke_error) = Some(error);
    }

    pub fn renew_count(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_count(&self) -> usize {
        self.revoke_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_count(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialTransport for MockCredentialTransport {
    async fn renew_self(&self, credential: &Credential) -> Result<Credential> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        if !self.renew_delay.is_zero() {
            tokio::time::sleep(self.renew_delay).await;
        }
        let next = lock(&self.renewals).pop_front();
        match next {
            Some(Ok(ttl)) => Ok(credential.with_lease(ttl, true)),
            Some(Err(e)) => Err(e),
            None => {
                Ok(credential.with_lease(credential.lease_duration(), credential.is_renewable()))
            }
        }
    }

    async fn revoke_self(&self, _credential: &Credential) -> Result<()> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.revoke_error).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn lookup_self(&self, _credential: &Credential) -> Result<TokenLookup> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.lookup).clone()
    }
}

/// Lease transport that grants the requested increment unless told otherwise.
pub struct MockLeaseTransport {
    renewals: Mutex<VecDeque<Result<Lease>>>,
    renew_delays: Mutex<HashMap<String, Duration>>,
    revoke_error: Mutex<Option<LifecycleError>>,
    renewed: Mutex<Vec<String>>,
    revoked: Mutex<Vec<String>>,
}

impl Default for MockLeaseTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLeaseTransport {
    pub fn new() -> Self {
        Self {
            renewals: Mutex::new(VecDeque::new()),
            renew_delays: Mutex::new(HashMap::new()),
            revoke_error: Mutex::new(None),
            renewed: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
        }
    }

    pub fn push_renewal(&self, result: Result<Lease>) {
        lock(&self.renewals).push_back(result);
    }

    /// Make renewals of one lease id take `delay` (tokio time).
    pub fn delay_renewal(&self, lease_id: impl Into<String>, delay: Duration) {
        lock(&self.renew_delays).insert(lease_id.into(), delay);
    }

    pub fn fail_revoke(&self, error: LifecycleError) {
        *lock(&self.revoke_error) = Some(error);
    }

    /// Lease ids passed to `renew`, in call order.
    pub fn renewed(&self) -> Vec<String> {
        lock(&self.renewed).clone()
    }

    /// Lease ids passed to `revoke`, in call order.
    pub fn revoked(&self) -> Vec<String> {
        lock(&self.revoked).clone()
    }
}

#[async_trait]
impl LeaseTransport for MockLeaseTransport {
    async fn renew(&self, lease: &Lease, increment: Duration) -> Result<Lease> {
        lock(&self.renewed).push(lease.id().to_string());
        let delay = lock(&self.renew_delays).get(lease.id()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.renewals).pop_front();
        match next {
            Some(result) => result,
            None => Ok(Lease::of(lease.id(), increment, lease.is_renewable())),
        }
    }

    async fn revoke(&self, lease: &Lease) -> Result<()> {
        lock(&self.revoked).push(lease.id().to_string());
        match lock(&self.revoke_error).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Fetcher answering per path. The last prepared answer for a path repeats.
#[derive(Default)]
pub struct MockSecretFetcher {
    responses: Mutex<HashMap<String, VecDeque<Result<Option<SecretResponse>>>>>,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl MockSecretFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every fetch take `delay` (tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn respond(&self, path: impl Into<String>, result: Result<Option<SecretResponse>>) {
        lock(&self.responses).entry(path.into()).or_default().push_back(result);
    }

    pub fn fetch_count(&self, path: &str) -> usize {
        lock(&self.fetches).get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SecretFetcher for MockSecretFetcher {
    async fn fetch(&self, path: &str) -> Result<Option<SecretResponse>> {
        *lock(&self.fetches).entry(path.to_string()).or_default() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut responses = lock(&self.responses);
        let Some(queue) = responses.get_mut(path) else {
            return Ok(None);
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(Ok(None))
        } else {
            queue.front().cloned().unwrap_or(Ok(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_authenticator_prefers_queued_results() {
        let auth =
            MockAuthenticator::new(Credential::login("s.default", Duration::from_secs(30), true));
        auth.push_result(Err(LifecycleError::authentication("bad secret id")));

        assert!(auth.login().await.is_err());
        assert_eq!(auth.login().await.unwrap().token().expose_secret(), "s.default");
        assert_eq!(auth.login_count(), 2);
    }

    #[tokio::test]
    async fn test_fetcher_repeats_last_answer() {
        let fetcher = MockSecretFetcher::new();
        fetcher.respond("secret/a", Ok(None));
        fetcher.respond(
            "secret/a",
            Ok(Some(SecretResponse::leaseless(serde_json::Map::new()))),
        );

        assert!(fetcher.fetch("secret/a").await.unwrap().is_none());
        assert!(fetcher.fetch("secret/a").await.unwrap().is_some());
        assert!(fetcher.fetch("secret/a").await.unwrap().is_some());
        assert!(fetcher.fetch("secret/unknown").await.unwrap().is_none());
        assert_eq!(fetcher.fetch_count("secret/a"), 3);
    }

    #[tokio::test]
    async fn test_lease_transport_grants_increment_by_default() {
        let transport = MockLeaseTransport::new();
        let lease = Lease::of("db/creds/1", Duration::from_secs(60), true);

        let renewed = transport.renew(&lease, Duration::from_secs(120)).await.unwrap();
        assert_eq!(renewed.id(), "db/creds/1");
        assert_eq!(renewed.lease_duration(), Duration::from_secs(120));
        assert_eq!(transport.renewed(), vec!["db/creds/1"]);
    }
}
