//! # Configuration Settings
//!
//! Defines the configuration structure for the session and lease engines.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::errors::{LifecycleError, Result};
use crate::lease::LeaseStrategy;
use crate::scheduling::{FixedTimeoutTrigger, DEFAULT_THRESHOLD_MARGIN};

const ENV_PREFIX: &str = "VAULT_LIFECYCLE_";

/// Main lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct LifecycleConfig {
    /// Token session configuration
    #[validate(nested)]
    #[serde(default)]
    pub session: SessionConfig,

    /// Secret lease configuration
    #[validate(nested)]
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Logging and metrics configuration
    #[validate(nested)]
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl LifecycleConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(LifecycleError::from)?;
        self.validate_custom()
    }

    /// Rules spanning several fields
    fn validate_custom(&self) -> Result<()> {
        if self.session.jitter_seconds > self.session.lead_time_seconds {
            return Err(LifecycleError::config(
                "Session jitter cannot exceed the session lead time",
            ));
        }
        if self.lease.jitter_seconds > self.lease.lead_time_seconds {
            return Err(LifecycleError::config("Lease jitter cannot exceed the lease lead time"));
        }
        Ok(())
    }

    /// Load configuration from `VAULT_LIFECYCLE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let session = SessionConfig {
            lead_time_seconds: env
                .parse("SESSION_LEAD_TIME_SECONDS")?
                .unwrap_or(defaults.session.lead_time_seconds),
            valid_ttl_threshold_seconds: env.parse("SESSION_VALID_TTL_THRESHOLD_SECONDS")?,
            self_lookup: env.flag("SESSION_SELF_LOOKUP")?.unwrap_or(defaults.session.self_lookup),
            blocking_timeout_seconds: env
                .parse("SESSION_BLOCKING_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.session.blocking_timeout_seconds),
            jitter_seconds: env
                .parse("SESSION_JITTER_SECONDS")?
                .unwrap_or(defaults.session.jitter_seconds),
        };

        let lease = LeaseConfig {
            lead_time_seconds: env
                .parse("LEASE_LEAD_TIME_SECONDS")?
                .unwrap_or(defaults.lease.lead_time_seconds),
            valid_ttl_threshold_seconds: env.parse("LEASE_VALID_TTL_THRESHOLD_SECONDS")?,
            strategy: env.parse("LEASE_STRATEGY")?.unwrap_or(defaults.lease.strategy),
            jitter_seconds: env
                .parse("LEASE_JITTER_SECONDS")?
                .unwrap_or(defaults.lease.jitter_seconds),
            renewal_increment_seconds: env.parse("LEASE_RENEWAL_INCREMENT_SECONDS")?,
        };

        let observability = ObservabilityConfig {
            enable_metrics: env
                .flag("ENABLE_METRICS")?
                .unwrap_or(defaults.observability.enable_metrics),
            service_name: env
                .raw("SERVICE_NAME")
                .unwrap_or(defaults.observability.service_name),
            log_level: env.raw("LOG_LEVEL").unwrap_or(defaults.observability.log_level),
            json_logging: env
                .flag("JSON_LOGGING")?
                .unwrap_or(defaults.observability.json_logging),
        };

        let config = Self { session, lease, observability };
        config.validate()?;
        Ok(config)
    }
}

/// Reads prefixed variables through an injectable lookup.
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, key))
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.raw(key)
            .map(|value| {
                value.trim().parse::<T>().map_err(|e| {
                    LifecycleError::config(format!(
                        "Invalid {}{}='{}': {}",
                        ENV_PREFIX, key, value, e
                    ))
                })
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        self.raw(key)
            .map(|value| match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(LifecycleError::config(format!(
                    "Invalid {}{}='{}': expected a boolean",
                    ENV_PREFIX, key, value
                ))),
            })
            .transpose()
    }
}

fn default_lead_time_seconds() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_blocking_timeout_seconds() -> u64 {
    30
}

/// Token session configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SessionConfig {
    /// Renew this long before the token expires
    #[serde(default = "default_lead_time_seconds")]
    #[validate(range(max = 86400, message = "Lead time must be at most one day"))]
    pub lead_time_seconds: u64,

    /// Tokens with less remaining TTL are dropped instead of renewed
    /// (default: lead time + 2s)
    #[serde(default)]
    pub valid_ttl_threshold_seconds: Option<u64>,

    /// Introspect externally supplied tokens after login
    #[serde(default = "default_true")]
    pub self_lookup: bool,

    /// Upper bound for `BlockingSession::token`
    #[serde(default = "default_blocking_timeout_seconds")]
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Blocking timeout must be between 1 and 3600 seconds"
    ))]
    pub blocking_timeout_seconds: u64,

    /// Maximum random amount subtracted from each renewal delay (0 = off)
    #[serde(default)]
    pub jitter_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lead_time_seconds: default_lead_time_seconds(),
            valid_ttl_threshold_seconds: None,
            self_lookup: true,
            blocking_timeout_seconds: default_blocking_timeout_seconds(),
            jitter_seconds: 0,
        }
    }
}

impl SessionConfig {
    pub fn lead_time(&self) -> Duration {
        Duration::from_secs(self.lead_time_seconds)
    }

    pub fn valid_ttl_threshold(&self) -> Duration {
        threshold_or_default(self.valid_ttl_threshold_seconds, self.lead_time())
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_secs(self.blocking_timeout_seconds)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_seconds)
    }

    /// Refresh trigger described by this configuration.
    pub fn trigger(&self) -> FixedTimeoutTrigger {
        FixedTimeoutTrigger::new(self.lead_time())
            .with_valid_ttl_threshold(self.valid_ttl_threshold())
            .with_jitter(self.jitter())
    }
}

/// Secret lease configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct LeaseConfig {
    /// Renew this long before a lease expires
    #[serde(default = "default_lead_time_seconds")]
    #[validate(range(max = 86400, message = "Lead time must be at most one day"))]
    pub lead_time_seconds: u64,

    /// Leases with less remaining TTL are expired instead of renewed
    /// (default: lead time + 2s)
    #[serde(default)]
    pub valid_ttl_threshold_seconds: Option<u64>,

    /// Reaction to renewal failures
    #[serde(default)]
    pub strategy: LeaseStrategy,

    /// Maximum random amount subtracted from each renewal delay (0 = off)
    #[serde(default)]
    pub jitter_seconds: u64,

    /// Increment requested on renewal (default: the lease's current duration)
    #[serde(default)]
    #[validate(range(min = 1, message = "Renewal increment must be at least one second"))]
    pub renewal_increment_seconds: Option<u64>,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lead_time_seconds: default_lead_time_seconds(),
            valid_ttl_threshold_seconds: None,
            strategy: LeaseStrategy::default(),
            jitter_seconds: 0,
            renewal_increment_seconds: None,
        }
    }
}

impl LeaseConfig {
    pub fn lead_time(&self) -> Duration {
        Duration::from_secs(self.lead_time_seconds)
    }

    pub fn valid_ttl_threshold(&self) -> Duration {
        threshold_or_default(self.valid_ttl_threshold_seconds, self.lead_time())
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_seconds)
    }

    /// Increment to request when renewing a lease of `lease_duration`.
    pub fn renewal_increment(&self, lease_duration: Duration) -> Duration {
        self.renewal_increment_seconds.map(Duration::from_secs).unwrap_or(lease_duration)
    }

    pub fn trigger(&self) -> FixedTimeoutTrigger {
        FixedTimeoutTrigger::new(self.lead_time())
            .with_valid_ttl_threshold(self.valid_ttl_threshold())
            .with_jitter(self.jitter())
    }
}

fn threshold_or_default(configured: Option<u64>, lead_time: Duration) -> Duration {
    configured.map(Duration::from_secs).unwrap_or(lead_time + DEFAULT_THRESHOLD_MARGIN)
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Record metrics through the `metrics` facade
    pub enable_metrics: bool,

    /// Service name attached to startup logs
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error) or an `EnvFilter` directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            service_name: "vault-lifecycle".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}
