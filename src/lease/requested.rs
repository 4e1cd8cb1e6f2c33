use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::transport::SecretFetcher;

/// How a registered secret is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestedSecretMode {
    /// Renew the lease; on loss, report expiry and stop.
    Renewable,
    /// Renew the lease; on loss, fetch the secret again.
    Rotating,
    /// Like `Renewable`, but registration fails if the initial fetch does.
    Immediate,
}

impl RequestedSecretMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Renewable => "renewable",
            Self::Rotating => "rotating",
            Self::Immediate => "immediate",
        }
    }
}

/// A secret path registered for lifecycle management, with the capability
/// that reads it.
#[derive(Clone)]
pub struct RequestedSecret {
    path: String,
    mode: RequestedSecretMode,
    fetcher: Arc<dyn SecretFetcher>,
}

impl RequestedSecret {
    pub fn new(
        path: impl Into<String>,
        mode: RequestedSecretMode,
        fetcher: Arc<dyn SecretFetcher>,
    ) -> Self {
        Self { path: path.into(), mode, fetcher }
    }

    pub fn renewable(path: impl Into<String>, fetcher: Arc<dyn SecretFetcher>) -> Self {
        Self::new(path, RequestedSecretMode::Renewable, fetcher)
    }

    pub fn rotating(path: impl Into<String>, fetcher: Arc<dyn SecretFetcher>) -> Self {
        Self::new(path, RequestedSecretMode::Rotating, fetcher)
    }

    pub fn immediate(path: impl Into<String>, fetcher: Arc<dyn SecretFetcher>) -> Self {
        Self::new(path, RequestedSecretMode::Immediate, fetcher)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> RequestedSecretMode {
        self.mode
    }

    pub fn fetcher(&self) -> &Arc<dyn SecretFetcher> {
        &self.fetcher
    }

    pub fn is_rotating(&self) -> bool {
        self.mode == RequestedSecretMode::Rotating
    }

    pub fn is_immediate(&self) -> bool {
        self.mode == RequestedSecretMode::Immediate
    }
}

impl fmt::Debug for RequestedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestedSecret")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockSecretFetcher;

    #[test]
    fn test_constructors_set_mode() {
        let fetcher: Arc<dyn SecretFetcher> = Arc::new(MockSecretFetcher::new());

        let rotating = RequestedSecret::rotating("database/creds/app", Arc::clone(&fetcher));
        assert!(rotating.is_rotating());
        assert_eq!(rotating.path(), "database/creds/app");

        let immediate = RequestedSecret::immediate("secret/app", fetcher);
        assert!(immediate.is_immediate());
        assert_eq!(immediate.mode().as_str(), "immediate");
        assert!(format!("{:?}", immediate).contains("secret/app"));
    }
}
