//! Secret payloads returned by a fetch.

use super::lease::Lease;
use serde_json::{Map, Value};

/// Body of a secret.
pub type SecretData = Map<String, Value>;

/// A fetched secret together with the lease Vault attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretResponse {
    pub data: SecretData,
    pub lease: Lease,
}

impl SecretResponse {
    pub fn new(data: SecretData, lease: Lease) -> Self {
        Self { data, lease }
    }

    /// A secret without a lease.
    pub fn leaseless(data: SecretData) -> Self {
        Self { data, lease: Lease::none() }
    }

    /// Convenience accessor for string-valued fields.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}
