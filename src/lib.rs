//! # vault-lifecycle
//!
//! Client-side lifecycle management for HashiCorp Vault: keeps a login token
//! alive and renews, rotates and revokes the leases of the secrets an
//! application reads.
//!
//! ## Architecture
//!
//! ```text
//! ClientAuthenticator ──► SessionEngine ──► token() for every Vault call
//!                              │
//!                    RefreshTrigger + RenewalScheduler
//!                              │
//! SecretFetcher ──────► LeaseEngine ──► EventMulticaster ──► listeners
//! ```
//!
//! ## Core Components
//!
//! - **SessionEngine**: single-flight login, token renewal ahead of expiry, re-login
//! - **LeaseEngine**: per-secret lease renewal, expiry handling and rotation
//! - **Scheduling**: renewal delay policies and a tokio-backed delayed task runner
//! - **Events**: typed session and lease events with isolated listeners
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vault_lifecycle::{
//!     AppRoleAuthentication, LifecycleConfig, RequestedSecretMode, Result, VaultConnection,
//!     VaultLifecycle,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = LifecycleConfig::from_env()?;
//!     let connection = VaultConnection::new("https://vault.example.com:8200");
//!     let auth = AppRoleAuthentication::new(connection.clone(), "role-id", "secret-id");
//!
//!     let lifecycle = VaultLifecycle::new(config, connection, Arc::new(auth))?;
//!     let handle = lifecycle
//!         .add_secret("database/creds/app", RequestedSecretMode::Rotating)
//!         .await?;
//!     println!("{:?}", lifecycle.leases().secret(&handle));
//!
//!     lifecycle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod lease;
pub mod observability;
pub mod scheduling;
pub mod session;
pub mod transport;

use std::sync::Arc;
use tracing::info;

// Re-export commonly used types and traits
pub use config::{LeaseConfig, LifecycleConfig, ObservabilityConfig, SessionConfig};
pub use domain::{Credential, CredentialKind, Lease, SecretData, SecretHandle, SecretResponse};
pub use errors::{LifecycleError, Result};
pub use events::{AuthenticationEvent, EventListener, LeaseEvent, ListenerId};
pub use lease::{LeaseEngine, LeaseStrategy, RequestedSecret, RequestedSecretMode};
pub use observability::init_observability;
pub use scheduling::{RefreshTrigger, RenewalScheduler, TokioScheduler};
pub use session::{BlockingSession, SessionEngine};
pub use transport::{
    AppRoleAuthentication, ClientAuthenticator, TokenAuthentication, VaultConnection,
};

use events::MetricsListener;
use transport::{
    SecretFetcher, TokenSource, VaultLeaseTransport, VaultSecretFetcher, VaultTokenTransport,
};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Session and lease engines wired against one Vault server, sharing one
/// scheduler.
pub struct VaultLifecycle {
    config: LifecycleConfig,
    connection: VaultConnection,
    scheduler: Arc<TokioScheduler>,
    session: SessionEngine,
    leases: LeaseEngine,
}

impl VaultLifecycle {
    /// Build the engines on the current tokio runtime.
    pub fn new(
        config: LifecycleConfig,
        connection: VaultConnection,
        authenticator: Arc<dyn ClientAuthenticator>,
    ) -> Result<Self> {
        config.validate()?;
        connection.validate()?;

        let scheduler = Arc::new(TokioScheduler::current()?);
        let token_transport = Arc::new(VaultTokenTransport::new(connection.clone())?);
        let session = SessionEngine::builder(
            authenticator,
            token_transport,
            Arc::clone(&scheduler) as Arc<dyn RenewalScheduler>,
        )
        .config(&config.session)
        .build();

        let tokens: Arc<dyn TokenSource> = Arc::new(session.clone());
        let lease_transport = Arc::new(VaultLeaseTransport::new(connection.clone(), tokens)?);
        let leases = LeaseEngine::builder(
            lease_transport,
            Arc::clone(&scheduler) as Arc<dyn RenewalScheduler>,
        )
        .config(&config.lease)
        .build();

        if config.observability.enable_metrics {
            let metrics = MetricsListener::default();
            session.add_listener(metrics.clone());
            session.add_error_listener(metrics.clone());
            leases.add_lease_listener(metrics.clone());
            leases.add_error_listener(metrics);
        }

        info!(
            app_name = APP_NAME,
            version = VERSION,
            vault_address = %connection.address,
            lease_strategy = %config.lease.strategy,
            "Vault lifecycle initialized"
        );

        Ok(Self { config, connection, scheduler, session, leases })
    }

    pub fn session(&self) -> &SessionEngine {
        &self.session
    }

    pub fn leases(&self) -> &LeaseEngine {
        &self.leases
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// A fetcher reading secrets with the session's token.
    pub fn fetcher(&self) -> Result<Arc<dyn SecretFetcher>> {
        let tokens: Arc<dyn TokenSource> = Arc::new(self.session.clone());
        Ok(Arc::new(VaultSecretFetcher::new(self.connection.clone(), tokens)?))
    }

    /// Register `path` with the lease engine, read through [`fetcher`](Self::fetcher).
    pub async fn add_secret(
        &self,
        path: impl Into<String>,
        mode: RequestedSecretMode,
    ) -> Result<SecretHandle> {
        let secret = RequestedSecret::new(path, mode, self.fetcher()?);
        self.leases.add_requested_secret(secret).await
    }

    /// Revoke all leases, then the token, and stop the scheduler.
    pub async fn shutdown(&self) {
        info!("Shutting down Vault lifecycle");
        self.leases.destroy().await;
        self.session.destroy().await;
        self.scheduler.shutdown();
    }
}

impl std::fmt::Debug for VaultLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultLifecycle")
            .field("address", &self.connection.address)
            .field("session", &self.session)
            .field("leases", &self.leases)
            .finish()
    }
}
