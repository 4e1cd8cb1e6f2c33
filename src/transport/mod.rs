//! Collaborator interfaces
//!
//! The engines reach Vault only through these traits. Concrete adapters for a
//! real Vault server live in [`vault`] and [`authentication`]; [`mock`]
//! provides scripted implementations for tests.

pub mod authentication;
pub mod mock;
pub mod vault;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Credential, Lease, SecretResponse};
use crate::errors::Result;

pub use authentication::{AppRoleAuthentication, TokenAuthentication};
pub use vault::{VaultConnection, VaultLeaseTransport, VaultSecretFetcher, VaultTokenTransport};

/// Result of introspecting a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLookup {
    pub ttl: Duration,
    pub renewable: bool,
}

/// Produces a fresh credential. Must be safe to call repeatedly.
#[async_trait]
pub trait ClientAuthenticator: Send + Sync {
    async fn login(&self) -> Result<Credential>;

    /// Whether a new login can be performed after the token is lost.
    /// Static tokens cannot; credential-based methods can.
    fn supports_relogin(&self) -> bool;
}

/// Token self-management calls.
#[async_trait]
pub trait CredentialTransport: Send + Sync {
    async fn renew_self(&self, credential: &Credential) -> Result<Credential>;

    async fn revoke_self(&self, credential: &Credential) -> Result<()>;

    async fn lookup_self(&self, credential: &Credential) -> Result<TokenLookup>;
}

/// Generic lease renewal and revocation.
#[async_trait]
pub trait LeaseTransport: Send + Sync {
    async fn renew(&self, lease: &Lease, increment: Duration) -> Result<Lease>;

    async fn revoke(&self, lease: &Lease) -> Result<()>;
}

/// Reads a secret. `Ok(None)` means the path does not exist.
#[async_trait]
pub trait SecretFetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Option<SecretResponse>>;
}

/// Supplies the token used to authorize Vault calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<Arc<Credential>>;
}

#[async_trait]
impl TokenSource for Credential {
    async fn token(&self) -> Result<Arc<Credential>> {
        Ok(Arc::new(self.clone()))
    }
}
