use std::sync::Arc;

use super::LifecycleEvent;
use crate::domain::Credential;
use crate::errors::LifecycleError;

/// Payload for events about a specific credential.
#[derive(Debug, Clone)]
pub struct CredentialEvent {
    pub credential: Arc<Credential>,
}

impl CredentialEvent {
    pub fn new(credential: Arc<Credential>) -> Self {
        Self { credential }
    }
}

/// A login or renewal failed.
#[derive(Debug, Clone)]
pub struct AuthenticationErrorEvent {
    pub error: LifecycleError,
    /// Credential involved, if the failure happened during renewal.
    pub credential: Option<Arc<Credential>>,
}

/// Session lifecycle events.
#[derive(Debug, Clone)]
pub enum AuthenticationEvent {
    /// A fresh login installed a credential.
    Created(CredentialEvent),
    /// A renewal replaced the credential.
    Renewed(CredentialEvent),
    Error(AuthenticationErrorEvent),
    /// The credential was dropped because it could no longer be renewed.
    LoginTokenExpired(CredentialEvent),
    /// The credential was revoked on request or shutdown.
    Revoked(CredentialEvent),
}

impl AuthenticationEvent {
    pub fn created(credential: Arc<Credential>) -> Self {
        Self::Created(CredentialEvent::new(credential))
    }

    pub fn renewed(credential: Arc<Credential>) -> Self {
        Self::Renewed(CredentialEvent::new(credential))
    }

    pub fn error(error: LifecycleError, credential: Option<Arc<Credential>>) -> Self {
        Self::Error(AuthenticationErrorEvent { error, credential })
    }

    pub fn login_token_expired(credential: Arc<Credential>) -> Self {
        Self::LoginTokenExpired(CredentialEvent::new(credential))
    }

    pub fn revoked(credential: Arc<Credential>) -> Self {
        Self::Revoked(CredentialEvent::new(credential))
    }

    /// Credential the event refers to, if any.
    pub fn credential(&self) -> Option<&Arc<Credential>> {
        match self {
            Self::Created(e) | Self::Renewed(e) | Self::LoginTokenExpired(e) | Self::Revoked(e) => {
                Some(&e.credential)
            }
            Self::Error(e) => e.credential.as_ref(),
        }
    }
}

impl LifecycleEvent for AuthenticationEvent {
    fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Renewed(_) => "renewed",
            Self::Error(_) => "error",
            Self::LoginTokenExpired(_) => "login_token_expired",
            Self::Revoked(_) => "revoked",
        }
    }
}
