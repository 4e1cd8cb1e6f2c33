//! HashiCorp Vault adapters
//!
//! Token self-management goes through `vaultrs`. Generic lease operations,
//! token lookup and raw secret reads go through `reqwest` against the HTTP API
//! because their response shapes differ between secrets engines and token
//! types and are parsed leniently here.
//!
//! ## Configuration
//!
//! ```rust,ignore
//! use vault_lifecycle::transport::VaultConnection;
//!
//! let connection = VaultConnection::new("https://vault.example.com:8200")
//!     .with_namespace("team-a");
//! ```

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;
use validator::Validate;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};

use super::{CredentialTransport, LeaseTransport, SecretFetcher, TokenLookup, TokenSource};
use crate::domain::{Credential, Lease, SecretData, SecretResponse};
use crate::errors::{classify_vault_error, LifecycleError, Result};

const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const TOKEN_HEADER: &str = "X-Vault-Token";

fn default_request_timeout_seconds() -> u64 {
    30
}

/// Where and how to reach Vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct VaultConnection {
    /// Vault server address
    #[validate(url(message = "Vault address must be a valid URL"))]
    pub address: String,

    /// Vault namespace (for Enterprise)
    pub namespace: Option<String>,

    /// Per-request timeout for HTTP calls
    #[serde(default = "default_request_timeout_seconds")]
    #[validate(range(
        min = 1,
        max = 300,
        message = "Request timeout must be between 1 and 300 seconds"
    ))]
    pub request_timeout_seconds: u64,
}

impl VaultConnection {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            namespace: None,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Load connection settings from the environment.
    ///
    /// Uses:
    /// - `VAULT_ADDR` (required; `None` when unset)
    /// - `VAULT_NAMESPACE`
    /// - `VAULT_LIFECYCLE_REQUEST_TIMEOUT_SECONDS` (default: 30)
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(address) = lookup("VAULT_ADDR") else {
            return Ok(None);
        };

        let request_timeout_seconds = match lookup("VAULT_LIFECYCLE_REQUEST_TIMEOUT_SECONDS") {
            Some(value) => value.parse().map_err(|e| {
                LifecycleError::config(format!("Invalid request timeout '{}': {}", value, e))
            })?,
            None => default_request_timeout_seconds(),
        };

        let connection =
            Self { address, namespace: lookup("VAULT_NAMESPACE"), request_timeout_seconds };
        connection.validate()?;
        Ok(Some(connection))
    }

    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| LifecycleError::config(format!("Invalid Vault connection: {}", e)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Build a `vaultrs` client, optionally authenticated with `token`.
    pub(crate) fn vault_client(&self, token: Option<&str>) -> Result<VaultClient> {
        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&self.address);

        if let Some(token) = token {
            settings_builder.token(token);
        }

        if let Some(ref namespace) = self.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }

        let settings = settings_builder.build().map_err(|e| {
            LifecycleError::config(format!("Invalid Vault client configuration: {}", e))
        })?;

        VaultClient::new(settings)
            .map_err(|e| LifecycleError::config(format!("Failed to create Vault client: {}", e)))
    }

    /// URL of an API path below `/v1/`.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.address.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| {
            LifecycleError::config(format!("Invalid Vault address '{}': {}", self.address, e))
        })?;
        base.join(&format!("v1/{}", path.trim_start_matches('/')))
            .map_err(|e| LifecycleError::config(format!("Invalid Vault path '{}': {}", path, e)))
    }
}

/// Thin JSON-over-HTTP client for the endpoints `vaultrs` does not cover.
#[derive(Clone)]
struct VaultHttp {
    client: reqwest::Client,
    connection: VaultConnection,
}

impl VaultHttp {
    fn new(connection: VaultConnection) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(connection.request_timeout())
            .build()
            .map_err(|e| LifecycleError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, connection })
    }

    /// Send a request and return the JSON body, or `None` for empty responses.
    async fn send(
        &self,
        method: Method,
        path: &str,
        credential: &Credential,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        let url = self.connection.endpoint(path)?;
        let mut request = self
            .client
            .request(method, url)
            .header(TOKEN_HEADER, credential.token().expose_secret());

        if let Some(ref namespace) = self.connection.namespace {
            request = request.header(NAMESPACE_HEADER, namespace);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(classify_vault_error(status.as_u16(), &error_message(status, &bytes)));
        }
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

impl fmt::Debug for VaultHttp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultHttp").field("address", &self.connection.address).finish()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

/// Vault reports failures as `{"errors": [...]}`. Fall back to the status text.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    let errors = serde_json::from_slice::<ErrorBody>(body).map(|b| b.errors).unwrap_or_default();
    if errors.is_empty() {
        status.canonical_reason().unwrap_or("unexpected status").to_string()
    } else {
        errors.join("; ")
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    #[serde(default)]
    ttl: u64,
    #[serde(default)]
    renewable: bool,
}

#[derive(Debug, Deserialize)]
struct LeaseBody {
    #[serde(default)]
    lease_id: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
}

impl LeaseBody {
    fn into_lease(self) -> Lease {
        let duration = Duration::from_secs(self.lease_duration);
        if self.lease_id.is_empty() {
            Lease::from_ttl(duration)
        } else {
            Lease::of(self.lease_id, duration, self.renewable)
        }
    }
}

#[derive(Debug, Deserialize)]
struct SecretBody {
    #[serde(flatten)]
    lease: LeaseBody,
    #[serde(default)]
    data: Option<SecretData>,
}

fn decode<T: serde::de::DeserializeOwned>(body: Option<Value>, what: &str) -> Result<T> {
    let body = body.ok_or_else(|| {
        LifecycleError::internal(format!("Vault returned an empty response for {}", what))
    })?;
    Ok(serde_json::from_value(body)?)
}

/// Token renewal, revocation and lookup against the token auth backend.
#[derive(Debug)]
pub struct VaultTokenTransport {
    connection: VaultConnection,
    http: VaultHttp,
    increment: Option<String>,
}

impl VaultTokenTransport {
    pub fn new(connection: VaultConnection) -> Result<Self> {
        let http = VaultHttp::new(connection.clone())?;
        Ok(Self { connection, http, increment: None })
    }

    /// Request a specific TTL on renewal instead of the token's default.
    pub fn with_increment(mut self, increment: Duration) -> Self {
        self.increment = Some(format!("{}s", increment.as_secs()));
        self
    }
}

#[async_trait]
impl CredentialTransport for VaultTokenTransport {
    #[instrument(skip_all)]
    async fn renew_self(&self, credential: &Credential) -> Result<Credential> {
        let client = self.connection.vault_client(Some(credential.token().expose_secret()))?;
        let auth = vaultrs::token::renew_self(&client, self.increment.as_deref()).await?;
        debug!(ttl_secs = auth.lease_duration, renewable = auth.renewable, "Renewed Vault token");
        Ok(credential.with_lease(Duration::from_secs(auth.lease_duration), auth.renewable))
    }

    #[instrument(skip_all)]
    async fn revoke_self(&self, credential: &Credential) -> Result<()> {
        let client = self.connection.vault_client(Some(credential.token().expose_secret()))?;
        vaultrs::token::revoke_self(&client).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn lookup_self(&self, credential: &Credential) -> Result<TokenLookup> {
        let body = self.http.send(Method::GET, "auth/token/lookup-self", credential, None).await?;
        let envelope: DataEnvelope<LookupData> = decode(body, "token lookup")?;
        Ok(TokenLookup {
            ttl: Duration::from_secs(envelope.data.ttl),
            renewable: envelope.data.renewable,
        })
    }
}

/// Lease renewal and revocation through `sys/leases`.
pub struct VaultLeaseTransport {
    http: VaultHttp,
    tokens: Arc<dyn TokenSource>,
}

impl VaultLeaseTransport {
    pub fn new(connection: VaultConnection, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Ok(Self { http: VaultHttp::new(connection)?, tokens })
    }
}

impl fmt::Debug for VaultLeaseTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultLeaseTransport").field("http", &self.http).finish()
    }
}

#[async_trait]
impl LeaseTransport for VaultLeaseTransport {
    #[instrument(skip(self), fields(lease_id = %lease.id()))]
    async fn renew(&self, lease: &Lease, increment: Duration) -> Result<Lease> {
        if !lease.has_lease_id() {
            return Err(LifecycleError::internal("Cannot renew a secret without a lease id"));
        }
        let credential = self.tokens.token().await?;
        let body = json!({ "lease_id": lease.id(), "increment": increment.as_secs() });
        let response =
            self.http.send(Method::PUT, "sys/leases/renew", &credential, Some(body)).await?;
        let renewed: LeaseBody = decode(response, "lease renewal")?;
        Ok(renewed.into_lease())
    }

    #[instrument(skip(self), fields(lease_id = %lease.id()))]
    async fn revoke(&self, lease: &Lease) -> Result<()> {
        if !lease.has_lease_id() {
            return Ok(());
        }
        let credential = self.tokens.token().await?;
        let body = json!({ "lease_id": lease.id() });
        self.http.send(Method::PUT, "sys/leases/revoke", &credential, Some(body)).await?;
        Ok(())
    }
}

/// Reads secrets with `GET /v1/{path}`.
pub struct VaultSecretFetcher {
    http: VaultHttp,
    tokens: Arc<dyn TokenSource>,
}

impl VaultSecretFetcher {
    pub fn new(connection: VaultConnection, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Ok(Self { http: VaultHttp::new(connection)?, tokens })
    }
}

impl fmt::Debug for VaultSecretFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSecretFetcher").field("http", &self.http).finish()
    }
}

#[async_trait]
impl SecretFetcher for VaultSecretFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, path: &str) -> Result<Option<SecretResponse>> {
        let credential = self.tokens.token().await?;
        let body = match self.http.send(Method::GET, path, &credential, None).await {
            Ok(body) => body,
            Err(LifecycleError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(body) = body else {
            return Ok(None);
        };

        let secret: SecretBody = serde_json::from_value(body)?;
        Ok(Some(SecretResponse::new(secret.data.unwrap_or_default(), secret.lease.into_lease())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_requires_address() {
        assert!(VaultConnection::from_lookup(lookup(&[])).unwrap().is_none());
    }

    #[test]
    fn test_from_lookup_reads_all_settings() {
        let connection = VaultConnection::from_lookup(lookup(&[
            ("VAULT_ADDR", "https://vault.example.com:8200"),
            ("VAULT_NAMESPACE", "team-a"),
            ("VAULT_LIFECYCLE_REQUEST_TIMEOUT_SECONDS", "10"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(connection.address, "https://vault.example.com:8200");
        assert_eq!(connection.namespace.as_deref(), Some("team-a"));
        assert_eq!(connection.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let bad_timeout = VaultConnection::from_lookup(lookup(&[
            ("VAULT_ADDR", "https://vault.example.com"),
            ("VAULT_LIFECYCLE_REQUEST_TIMEOUT_SECONDS", "soon"),
        ]));
        assert!(matches!(bad_timeout, Err(LifecycleError::Config { .. })));

        let bad_address = VaultConnection::from_lookup(lookup(&[("VAULT_ADDR", "not a url")]));
        assert!(matches!(bad_address, Err(LifecycleError::Config { .. })));
    }

    #[test]
    fn test_endpoint_keeps_address_path_prefix() {
        let connection = VaultConnection::new("https://proxy.example.com/vault");
        assert_eq!(
            connection.endpoint("/sys/leases/renew").unwrap().as_str(),
            "https://proxy.example.com/vault/v1/sys/leases/renew"
        );

        let connection = VaultConnection::new("http://127.0.0.1:8200");
        assert_eq!(
            connection.endpoint("database/creds/app").unwrap().as_str(),
            "http://127.0.0.1:8200/v1/database/creds/app"
        );
    }

    #[test]
    fn test_error_message_prefers_vault_errors() {
        let body = br#"{"errors":["permission denied"]}"#;
        assert_eq!(error_message(StatusCode::FORBIDDEN, body), "permission denied");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, b"<html>"), "Bad Gateway");
    }

    #[test]
    fn test_lease_body_without_id_keeps_ttl() {
        let body = LeaseBody { lease_id: String::new(), lease_duration: 3600, renewable: false };
        let lease = body.into_lease();
        assert!(!lease.has_lease_id());
        assert_eq!(lease.lease_duration(), Duration::from_secs(3600));
    }
}
