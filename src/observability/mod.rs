//! # Observability
//!
//! Structured logging via `tracing` and counters via the `metrics` facade.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{describe_metrics, LifecycleMetrics};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and, when enabled, register metric descriptions.
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config)?;

    if config.enable_metrics {
        describe_metrics();
    }

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        metrics_enabled = config.enable_metrics,
        "Observability initialized"
    );
    Ok(())
}
