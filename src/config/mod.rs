//! # Configuration Management
//!
//! Settings consumed by the session and lease engines. Everything has a
//! default; [`LifecycleConfig::from_env`] overrides from `VAULT_LIFECYCLE_*`
//! environment variables.

pub mod settings;

pub use settings::{LeaseConfig, LifecycleConfig, ObservabilityConfig, SessionConfig};
