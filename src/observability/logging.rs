//! # Structured Logging
//!
//! Subscriber installation and span macros for the lifecycle engines.
//!
//! Engines only emit events through `tracing`; installing a subscriber is the
//! embedding application's choice. [`init_logging`] is a convenience for
//! applications that have no subscriber of their own.

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;
use crate::errors::{LifecycleError, Result};

/// Create a span for a session engine operation.
///
/// ```rust,ignore
/// let span = session_span!("renew", kind = %credential.kind());
/// ```
#[macro_export]
macro_rules! session_span {
    ($operation:expr) => {
        tracing::info_span!("vault_session", operation = %$operation)
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!("vault_session", operation = %$operation, $($field)*)
    };
}

/// Create a span for a lease engine operation on one secret path.
#[macro_export]
macro_rules! lease_span {
    ($operation:expr, $path:expr) => {
        tracing::info_span!("vault_lease", operation = %$operation, path = %$path)
    };
    ($operation:expr, $path:expr, $($field:tt)*) => {
        tracing::info_span!("vault_lease", operation = %$operation, path = %$path, $($field)*)
    };
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. An already-installed
/// global subscriber is kept.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            LifecycleError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_logging {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    if installed.is_err() {
        // Subscriber already set elsewhere (e.g. by the host application or tests).
        debug!("Global tracing subscriber already installed; keeping it");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_tolerates_existing_subscriber() {
        let config = ObservabilityConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_span_macros_expand() {
        let session = crate::session_span!("login");
        let lease = crate::lease_span!("renew", "database/creds/app", lease_id = "abc");
        drop(session);
        drop(lease);
    }
}
