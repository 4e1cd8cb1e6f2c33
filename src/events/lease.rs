use std::sync::Arc;

use super::LifecycleEvent;
use crate::domain::{Lease, SecretData, SecretHandle};
use crate::errors::LifecycleError;

/// Secret registered and fetched with its initial lease.
#[derive(Debug, Clone)]
pub struct LeaseCreated {
    pub handle: SecretHandle,
    pub path: String,
    pub lease: Lease,
    pub data: Arc<SecretData>,
}

#[derive(Debug, Clone)]
pub struct LeaseRenewed {
    pub handle: SecretHandle,
    pub path: String,
    pub previous: Lease,
    pub lease: Lease,
}

/// Secret re-fetched after its lease expired or was rotated by hand.
/// `previous` is exactly the lease held before rotation.
#[derive(Debug, Clone)]
pub struct LeaseRotated {
    pub handle: SecretHandle,
    pub path: String,
    pub previous: Lease,
    pub lease: Lease,
    pub data: Arc<SecretData>,
}

/// Payload for expiry and revocation.
#[derive(Debug, Clone)]
pub struct SecretLeaseEvent {
    pub handle: SecretHandle,
    pub path: String,
    pub lease: Lease,
}

#[derive(Debug, Clone)]
pub struct LeaseFailure {
    pub handle: SecretHandle,
    pub path: String,
    pub lease: Lease,
    pub error: LifecycleError,
}

#[derive(Debug, Clone)]
pub struct SecretNotFound {
    pub handle: SecretHandle,
    pub path: String,
}

/// Secret lease lifecycle events.
#[derive(Debug, Clone)]
pub enum LeaseEvent {
    Created(LeaseCreated),
    Renewed(LeaseRenewed),
    Rotated(LeaseRotated),
    Expired(SecretLeaseEvent),
    Error(LeaseFailure),
    NotFound(SecretNotFound),
    Revoked(SecretLeaseEvent),
}

impl LeaseEvent {
    pub fn handle(&self) -> &SecretHandle {
        match self {
            Self::Created(e) => &e.handle,
            Self::Renewed(e) => &e.handle,
            Self::Rotated(e) => &e.handle,
            Self::Expired(e) | Self::Revoked(e) => &e.handle,
            Self::Error(e) => &e.handle,
            Self::NotFound(e) => &e.handle,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Created(e) => &e.path,
            Self::Renewed(e) => &e.path,
            Self::Rotated(e) => &e.path,
            Self::Expired(e) | Self::Revoked(e) => &e.path,
            Self::Error(e) => &e.path,
            Self::NotFound(e) => &e.path,
        }
    }

    /// Lease the event is about. For rotation this is the new lease.
    pub fn lease(&self) -> Option<&Lease> {
        match self {
            Self::Created(e) => Some(&e.lease),
            Self::Renewed(e) => Some(&e.lease),
            Self::Rotated(e) => Some(&e.lease),
            Self::Expired(e) | Self::Revoked(e) => Some(&e.lease),
            Self::Error(e) => Some(&e.lease),
            Self::NotFound(_) => None,
        }
    }
}

impl LifecycleEvent for LeaseEvent {
    fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Renewed(_) => "renewed",
            Self::Rotated(_) => "rotated",
            Self::Expired(_) => "expired",
            Self::Error(_) => "error",
            Self::NotFound(_) => "not_found",
            Self::Revoked(_) => "revoked",
        }
    }
}
