//! # Error Handling
//!
//! Error types for session and lease lifecycle operations.
//!
//! Errors fall into two classes that drive the engines' recovery decisions:
//!
//! - **Transient**: network failures, timeouts, rate limiting and 5xx responses.
//!   These are retried only through the normal renewal cycle.
//! - **Terminal**: everything else (token or lease not found, permission denied,
//!   any rejection that is not explicitly transient). The credential or lease is
//!   treated as expired.

use thiserror::Error;

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors that can occur while authenticating, renewing or fetching secrets.
///
/// The type is `Clone` so that a single failed login can be handed to every
/// caller that was waiting on it, and so that events can carry the error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Login against the authentication backend failed.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Token, lease or secret does not exist (anymore).
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// The server refused the operation for policy reasons.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// The server rejected the request with a status not covered above.
    #[error("Request rejected (status: {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Network or connection level failure.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// An operation did not complete in time.
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Response body could not be decoded.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// The engine has been shut down.
    #[error("Lifecycle engine has been destroyed")]
    Destroyed,

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LifecycleError {
    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into() }
    }

    /// Create a not found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a permission denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied { message: message.into() }
    }

    /// Create a rejection error for an unexpected response status.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected { status, message: message.into() }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms: duration.as_millis() as u64 }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether the failure may go away on its own and is worth another attempt
    /// on the next scheduled cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the failure invalidates the credential or lease it concerns.
    pub fn is_terminal(&self) -> bool {
        !self.is_transient()
    }

    /// Short label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::NotFound { .. } => "not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Rejected { .. } => "rejected",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Config { .. } => "config",
            Self::Serialization { .. } => "serialization",
            Self::Destroyed => "destroyed",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: err.to_string() }
    }
}

impl From<validator::ValidationErrors> for LifecycleError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::config(format!("Validation failed: {}", err))
    }
}

impl From<reqwest::Error> for LifecycleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout { operation: "vault request".to_string(), duration_ms: 0 };
        }
        match err.status() {
            Some(status) => classify_vault_error(status.as_u16(), &err.to_string()),
            None if err.is_decode() => Self::Serialization { message: err.to_string() },
            None => Self::transport(err.to_string()),
        }
    }
}

impl From<vaultrs::error::ClientError> for LifecycleError {
    fn from(err: vaultrs::error::ClientError) -> Self {
        match err {
            vaultrs::error::ClientError::APIError { code, errors } => {
                classify_vault_error(code, &errors.join(", "))
            }
            other => {
                let message = other.to_string();
                if is_retryable_vault_error(&message) {
                    Self::transport(message)
                } else {
                    Self::internal(message)
                }
            }
        }
    }
}

/// Map a Vault HTTP failure onto the error taxonomy.
///
/// Vault answers an unknown or revoked token with `403 permission denied` and a
/// missing lease with `400 lease not found` or `lease is not renewable`, so the
/// message is inspected in addition to the status.
pub fn classify_vault_error(status: u16, message: &str) -> LifecycleError {
    let lower = message.to_lowercase();

    if status == 404 || lower.contains("not found") || lower.contains("invalid lease") {
        return LifecycleError::not_found(message);
    }

    if status == 403 || lower.contains("permission denied") {
        return LifecycleError::permission_denied(message);
    }

    LifecycleError::rejected(status, message)
}

/// Check whether a non-HTTP Vault client error looks transient.
fn is_retryable_vault_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    error_lower.contains("connection refused")
        || error_lower.contains("connection reset")
        || error_lower.contains("connection closed")
        || error_lower.contains("timed out")
        || error_lower.contains("timeout")
        || error_lower.contains("error sending request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_constructors() {
        let err = LifecycleError::not_found("secret/data/app");
        assert!(matches!(err, LifecycleError::NotFound { .. }));
        assert_eq!(err.to_string(), "Not found: secret/data/app");

        let err = LifecycleError::timeout("login", Duration::from_secs(30));
        assert_eq!(err.to_string(), "Operation timed out: login after 30000ms");

        let err = LifecycleError::rejected(400, "bad request");
        assert!(err.to_string().contains("400"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LifecycleError::transport("connection refused").is_transient());
        assert!(LifecycleError::timeout("renew", Duration::from_secs(1)).is_transient());
        assert!(LifecycleError::rejected(503, "sealed").is_transient());
        assert!(LifecycleError::rejected(429, "rate limited").is_transient());

        assert!(LifecycleError::rejected(400, "invalid").is_terminal());
        assert!(LifecycleError::not_found("lease").is_terminal());
        assert!(LifecycleError::permission_denied("policy").is_terminal());
        assert!(LifecycleError::authentication("bad role").is_terminal());
    }

    #[test]
    fn test_classify_vault_error() {
        assert!(matches!(
            classify_vault_error(400, "lease not found"),
            LifecycleError::NotFound { .. }
        ));
        assert!(matches!(
            classify_vault_error(400, "invalid lease ID"),
            LifecycleError::NotFound { .. }
        ));
        assert!(matches!(classify_vault_error(404, ""), LifecycleError::NotFound { .. }));
        assert!(matches!(
            classify_vault_error(403, "permission denied"),
            LifecycleError::PermissionDenied { .. }
        ));
        assert!(matches!(
            classify_vault_error(500, "internal"),
            LifecycleError::Rejected { status: 500, .. }
        ));
    }

    #[test]
    fn test_is_retryable_vault_error() {
        assert!(is_retryable_vault_error("Connection reset by peer"));
        assert!(is_retryable_vault_error("request timed out"));
        assert!(!is_retryable_vault_error("invalid role"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: LifecycleError = err.into();
        assert_eq!(err.kind(), "serialization");
    }
}
