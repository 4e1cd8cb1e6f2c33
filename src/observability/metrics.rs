//! # Metrics Collection
//!
//! Counters and gauges for the session and lease engines, recorded through the
//! `metrics` facade. Without an installed recorder every call is a no-op, so
//! the embedding application decides whether and where metrics are exported.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Duration;

use crate::lease::RequestedSecretMode;

/// Records lifecycle metrics.
#[derive(Debug, Clone, Default)]
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Record a login attempt and how long it took.
    pub fn record_login(&self, success: bool, duration: Duration) {
        let labels = [("status", status_label(success).to_string())];
        counter!("vault_lifecycle_logins_total", &labels).increment(1);
        histogram!("vault_lifecycle_login_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a renewal attempt. `target` is `session` or `lease`.
    pub fn record_renewal(&self, target: &str, success: bool) {
        let labels =
            [("target", target.to_string()), ("status", status_label(success).to_string())];
        counter!("vault_lifecycle_renewals_total", &labels).increment(1);
    }

    /// Record a rotation attempt, labelled by the secret's registration mode.
    pub fn record_rotation(&self, mode: RequestedSecretMode, success: bool) {
        counter!("vault_lifecycle_rotations_total", &rotation_labels(mode, success)).increment(1);
    }

    pub fn record_authentication_event(&self, event: &str) {
        let labels = [("event", event.to_string())];
        counter!("vault_lifecycle_authentication_events_total", &labels).increment(1);
    }

    pub fn record_lease_event(&self, event: &str) {
        let labels = [("event", event.to_string())];
        counter!("vault_lifecycle_lease_events_total", &labels).increment(1);
    }

    /// Update the number of secrets currently registered with a lease engine.
    pub fn set_managed_secrets(&self, count: usize) {
        gauge!("vault_lifecycle_managed_secrets").set(count as f64);
    }
}

fn rotation_labels(mode: RequestedSecretMode, success: bool) -> [(&'static str, String); 2] {
    [("mode", mode.as_str().to_string()), ("status", status_label(success).to_string())]
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!("vault_lifecycle_logins_total", Unit::Count, "Login attempts by outcome");
    describe_histogram!(
        "vault_lifecycle_login_duration_seconds",
        Unit::Seconds,
        "Time spent performing a login"
    );
    describe_counter!(
        "vault_lifecycle_renewals_total",
        Unit::Count,
        "Token and lease renewal attempts by target and outcome"
    );
    describe_counter!(
        "vault_lifecycle_rotations_total",
        Unit::Count,
        "Secret rotations by registration mode and outcome"
    );
    describe_counter!(
        "vault_lifecycle_authentication_events_total",
        Unit::Count,
        "Published session events"
    );
    describe_counter!("vault_lifecycle_lease_events_total", Unit::Count, "Published lease events");
    describe_gauge!(
        "vault_lifecycle_managed_secrets",
        Unit::Count,
        "Secrets currently registered for lease management"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        let metrics = LifecycleMetrics::new();
        metrics.record_login(true, Duration::from_millis(120));
        metrics.record_renewal("session", false);
        metrics.record_rotation(RequestedSecretMode::Rotating, true);
        metrics.record_authentication_event("created");
        metrics.record_lease_event("rotated");
        metrics.set_managed_secrets(3);
    }

    #[test]
    fn test_rotation_labels_are_bounded() {
        let labels = rotation_labels(RequestedSecretMode::Rotating, false);
        let keys: Vec<_> = labels.iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, vec!["mode", "status"]);
        assert_eq!(labels[0].1, "rotating");
        assert_eq!(labels[1].1, "error");
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(true), "success");
        assert_eq!(status_label(false), "error");
    }
}
