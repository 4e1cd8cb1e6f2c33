//! Synchronous access to a [`SessionEngine`] for code running outside the
//! async runtime.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use super::SessionEngine;
use crate::config::SessionConfig;
use crate::domain::Credential;
use crate::errors::{LifecycleError, Result};

/// Blocking facade over a session engine.
///
/// The engine runs on `handle`, which must belong to a multi-threaded runtime
/// so that it keeps making progress while the caller's thread is blocked.
#[derive(Clone, Debug)]
pub struct BlockingSession {
    engine: SessionEngine,
    handle: Handle,
    timeout: Duration,
}

impl BlockingSession {
    pub fn new(engine: SessionEngine, handle: Handle, timeout: Duration) -> Self {
        Self { engine, handle, timeout }
    }

    pub fn from_config(engine: SessionEngine, handle: Handle, config: &SessionConfig) -> Self {
        Self::new(engine, handle, config.blocking_timeout())
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    /// Block until a token is available or the timeout elapses.
    ///
    /// Fails immediately when called from inside a tokio runtime, where
    /// blocking would stall the executor.
    pub fn token(&self) -> Result<Arc<Credential>> {
        let engine = self.engine.clone();
        self.block_on("session token", async move { engine.token().await })?
    }

    /// Blocking variant of [`SessionEngine::revoke`].
    pub fn revoke(&self) -> Result<()> {
        let engine = self.engine.clone();
        self.block_on("session revoke", async move { engine.revoke().await })
    }

    fn block_on<F>(&self, operation: &str, future: F) -> Result<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            return Err(LifecycleError::internal(format!(
                "{} cannot block inside an async runtime; use SessionEngine directly",
                operation
            )));
        }

        let timeout = self.timeout;
        self.handle
            .block_on(async move { tokio::time::timeout(timeout, future).await })
            .map_err(|_| LifecycleError::timeout(operation, timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::{RenewalScheduler, TokioScheduler};
    use crate::transport::mock::{MockAuthenticator, MockCredentialTransport};
    use crate::transport::{ClientAuthenticator, CredentialTransport};

    fn engine(auth: MockAuthenticator, handle: Handle) -> SessionEngine {
        SessionEngine::builder(
            Arc::new(auth) as Arc<dyn ClientAuthenticator>,
            Arc::new(MockCredentialTransport::new()) as Arc<dyn CredentialTransport>,
            Arc::new(TokioScheduler::new(handle)) as Arc<dyn RenewalScheduler>,
        )
        .build()
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_token_blocks_until_login_completes() {
        let rt = runtime();
        let auth =
            MockAuthenticator::new(Credential::login("s.blocking", Duration::from_secs(60), true))
                .with_delay(Duration::from_millis(20));
        let session = BlockingSession::new(
            engine(auth, rt.handle().clone()),
            rt.handle().clone(),
            Duration::from_secs(5),
        );

        let credential = session.token().unwrap();
        assert_eq!(credential.token().expose_secret(), "s.blocking");
        session.revoke().unwrap();
        assert!(session.engine().current_credential().is_none());
    }

    #[test]
    fn test_token_times_out() {
        let rt = runtime();
        let auth =
            MockAuthenticator::new(Credential::login("s.slow", Duration::from_secs(60), true))
                .with_delay(Duration::from_secs(5));
        let session = BlockingSession::new(
            engine(auth, rt.handle().clone()),
            rt.handle().clone(),
            Duration::from_millis(50),
        );

        let err = session.token().unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_token_refuses_to_block_inside_runtime() {
        let handle = Handle::current();
        let session = BlockingSession::new(
            engine(MockAuthenticator::new(Credential::external("s.static")), handle.clone()),
            handle,
            Duration::from_secs(1),
        );

        let err = session.token().unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
