//! Authentication credential held by the session engine.

use super::sensitive::SecretString;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// How a credential came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Issued by a login call; lease duration and renewability are known.
    Login,
    /// Supplied from outside (static token). TTL and renewability are unknown
    /// until a self-lookup fills them in.
    External,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::External => "external",
        }
    }
}

/// A Vault token plus its lease metadata.
///
/// Credentials are immutable. Renewal produces a new `Credential` which the
/// session engine installs in place of the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    token: SecretString,
    lease_duration: Duration,
    renewable: bool,
    issued_at: Instant,
    kind: CredentialKind,
    metadata: HashMap<String, String>,
}

impl Credential {
    /// A credential obtained through a login.
    pub fn login(
        token: impl Into<SecretString>,
        lease_duration: Duration,
        renewable: bool,
    ) -> Self {
        Self {
            token: token.into(),
            lease_duration,
            renewable,
            issued_at: Instant::now(),
            kind: CredentialKind::Login,
            metadata: HashMap::new(),
        }
    }

    /// An externally supplied token with unknown TTL.
    ///
    /// Until augmented, it is treated as permanent: zero duration, not renewable.
    pub fn external(token: impl Into<SecretString>) -> Self {
        Self {
            token: token.into(),
            lease_duration: Duration::ZERO,
            renewable: false,
            issued_at: Instant::now(),
            kind: CredentialKind::External,
            metadata: HashMap::new(),
        }
    }

    /// Copy of this credential carrying the given lease information, as learned
    /// from a token self-lookup. The issue instant restarts at now because `ttl`
    /// is the remaining time reported by the server.
    pub fn with_lease(&self, ttl: Duration, renewable: bool) -> Self {
        Self {
            token: self.token.clone(),
            lease_duration: ttl,
            renewable,
            issued_at: Instant::now(),
            kind: self.kind,
            metadata: self.metadata.clone(),
        }
    }

    /// Attach issuing metadata (policies, accessor, auth mount, ...).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn token(&self) -> &SecretString {
        &self.token
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

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Whether this token came out of a login flow (as opposed to a static token).
    pub fn is_login_token(&self) -> bool {
        self.kind == CredentialKind::Login
    }

    /// A zero-duration, non-renewable credential never expires and is never renewed.
    pub fn is_permanent(&self) -> bool {
        self.lease_duration.is_zero() && !self.renewable
    }

    /// Whether the renewal scheduler should look after this credential.
    pub fn needs_renewal(&self) -> bool {
        self.renewable && !self.lease_duration.is_zero()
    }

    /// Time left until the lease runs out. Zero once expired.
    pub fn remaining_ttl(&self) -> Duration {
        self.lease_duration.saturating_sub(self.issued_at.elapsed())
    }

    /// Whether the remaining lifetime has dropped to or below `threshold`.
    /// Permanent credentials never expire.
    pub fn is_expiring(&self, threshold: Duration) -> bool {
        !self.lease_duration.is_zero() && self.remaining_ttl() <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_credential() {
        let credential = Credential::login("s.abc", Duration::from_secs(30), true);

        assert!(credential.is_login_token());
        assert!(credential.needs_renewal());
        assert!(!credential.is_permanent());
        assert_eq!(credential.token().expose_secret(), "s.abc");
    }

    #[test]
    fn test_external_credential_is_permanent() {
        let credential = Credential::external("s.static");

        assert_eq!(credential.kind(), CredentialKind::External);
        assert!(credential.is_permanent());
        assert!(!credential.needs_renewal());
        assert!(!credential.is_expiring(Duration::from_secs(3600)));
    }

    #[test]
    fn test_with_lease_keeps_token_and_kind() {
        let credential =
            Credential::external("s.static").with_metadata("policies", "default,app");
        let augmented = credential.with_lease(Duration::from_secs(600), true);

        assert_eq!(augmented.token(), credential.token());
        assert_eq!(augmented.kind(), CredentialKind::External);
        assert_eq!(augmented.lease_duration(), Duration::from_secs(600));
        assert!(augmented.needs_renewal());
        assert_eq!(augmented.metadata().get("policies").map(String::as_str), Some("default,app"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_ttl_counts_down() {
        let credential = Credential::login("s.abc", Duration::from_secs(30), true);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(credential.remaining_ttl(), Duration::from_secs(10));
        assert!(credential.is_expiring(Duration::from_secs(10)));
        assert!(!credential.is_expiring(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(credential.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let credential = Credential::login("s.very-secret", Duration::from_secs(30), true);
        let debug = format!("{:?}", credential);

        assert!(!debug.contains("very-secret"));
    }
}
