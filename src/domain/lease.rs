//! Secret leases.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// A lease attached to a secret.
///
/// An empty `id` means "no lease": static secrets and secrets Vault does not
/// track. Such leases are never scheduled for renewal.
#[derive(Clone, PartialEq)]
pub struct Lease {
    id: String,
    lease_duration: Duration,
    renewable: bool,
    issued_at: Instant,
}

impl Lease {
    pub fn of(id: impl Into<String>, lease_duration: Duration, renewable: bool) -> Self {
        Self { id: id.into(), lease_duration, renewable, issued_at: Instant::now() }
    }

    /// Sentinel for leaseless secrets.
    pub fn none() -> Self {
        Self::of("", Duration::ZERO, false)
    }

    /// A leaseless secret that still advertises a TTL (e.g. KV `ttl` hints).
    pub fn from_ttl(lease_duration: Duration) -> Self {
        Self::of("", lease_duration, false)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_lease_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn is_renewable(&self) -> bool {
        self.renewable
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.lease_duration.saturating_sub(self.issued_at.elapsed())
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_lease_id() && self.lease_duration.is_zero() {
            return write!(f, "Lease(none)");
        }
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_lease_id() {
            write!(f, "{} ({}s)", self.id, self.lease_duration.as_secs())
        } else {
            write!(f, "<none>")
        }
    }
}
