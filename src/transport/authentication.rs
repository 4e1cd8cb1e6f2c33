//! Authentication methods
//!
//! - [`TokenAuthentication`]: a token handed in by the application
//! - [`AppRoleAuthentication`]: AppRole login through `vaultrs`

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument};

use super::vault::VaultConnection;
use super::ClientAuthenticator;
use crate::domain::{Credential, SecretString};
use crate::errors::{LifecycleError, Result};

/// Uses a pre-issued token. Cannot log in again once the token is gone.
#[derive(Debug, Clone)]
pub struct TokenAuthentication {
    token: SecretString,
}

impl TokenAuthentication {
    pub fn new(token: impl Into<SecretString>) -> Self {
        Self { token: token.into() }
    }

    /// Read the token from `VAULT_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("VAULT_TOKEN")
            .map_err(|_| LifecycleError::config("VAULT_TOKEN is not set"))?;
        if token.is_empty() {
            return Err(LifecycleError::config("VAULT_TOKEN is empty"));
        }
        Ok(Self::new(token))
    }
}

#[async_trait]
impl ClientAuthenticator for TokenAuthentication {
    async fn login(&self) -> Result<Credential> {
        Ok(Credential::external(self.token.clone()))
    }

    fn supports_relogin(&self) -> bool {
        false
    }
}

fn default_approle_mount() -> String {
    "approle".to_string()
}

/// Logs in with a role id and secret id.
pub struct AppRoleAuthentication {
    connection: VaultConnection,
    mount: String,
    role_id: String,
    secret_id: SecretString,
}

impl AppRoleAuthentication {
    pub fn new(
        connection: VaultConnection,
        role_id: impl Into<String>,
        secret_id: impl Into<SecretString>,
    ) -> Self {
        Self {
            connection,
            mount: default_approle_mount(),
            role_id: role_id.into(),
            secret_id: secret_id.into(),
        }
    }

    /// Use an AppRole backend mounted somewhere other than `approle`.
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }
}

impl fmt::Debug for AppRoleAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppRoleAuthentication")
            .field("address", &self.connection.address)
            .field("mount", &self.mount)
            .field("role_id", &self.role_id)
            .field("secret_id", &self.secret_id)
            .finish()
    }
}

#[async_trait]
impl ClientAuthenticator for AppRoleAuthentication {
    #[instrument(skip(self), fields(mount = %self.mount))]
    async fn login(&self) -> Result<Credential> {
        let client = self.connection.vault_client(None)?;
        let auth = vaultrs::auth::approle::login(
            &client,
            &self.mount,
            &self.role_id,
            self.secret_id.expose_secret(),
        )
        .await
        .map_err(|e| match LifecycleError::from(e) {
            transient if transient.is_transient() => transient,
            other => LifecycleError::authentication(format!("AppRole login failed: {}", other)),
        })?;

        info!(
            ttl_secs = auth.lease_duration,
            renewable = auth.renewable,
            "AppRole login succeeded"
        );

        Ok(Credential::login(
            auth.client_token,
            Duration::from_secs(auth.lease_duration),
            auth.renewable,
        )
        .with_metadata("accessor", auth.accessor)
        .with_metadata("method", "approle"))
    }

    fn supports_relogin(&self) -> bool {
        true
    }
}
