//! Refresh trigger policies.
//!
//! A trigger turns the remaining lifetime of a credential or lease into the
//! delay before the next renewal attempt. Triggers are pure apart from the
//! optional jitter.

use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Smallest delay a trigger ever produces. Prevents zero-delay reschedule loops.
pub const MIN_RENEWAL_DELAY: Duration = Duration::from_secs(1);

/// Safety margin added on top of the lead time to absorb scheduling jitter.
pub const DEFAULT_THRESHOLD_MARGIN: Duration = Duration::from_secs(2);

/// Policy deciding when the next renewal happens.
pub trait RefreshTrigger: Send + Sync + fmt::Debug {
    /// Delay from now until the next execution for something with `ttl`
    /// remaining, or `None` if no further execution should happen.
    fn next_execution(&self, ttl: Duration) -> Option<Duration>;

    /// Minimum remaining TTL for a credential or lease to still be worth renewing.
    /// Anything at or below it is treated as expired.
    fn valid_ttl_threshold(&self, ttl: Duration) -> Duration;
}

/// Fires exactly once after a fixed delay.
#[derive(Debug)]
pub struct OneShotTrigger {
    delay: Duration,
    fired: AtomicBool,
}

impl OneShotTrigger {
    pub fn new(delay: Duration) -> Self {
        Self { delay, fired: AtomicBool::new(false) }
    }
}

impl RefreshTrigger for OneShotTrigger {
    fn next_execution(&self, _ttl: Duration) -> Option<Duration> {
        if self.fired.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(self.delay)
        }
    }

    fn valid_ttl_threshold(&self, _ttl: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Renews a fixed lead time before expiry.
///
/// `delay = max(min_delay, ttl - lead_time - jitter)` where `jitter` is drawn
/// uniformly from `[0, max_jitter]`. Jitter only ever moves renewal earlier.
#[derive(Clone)]
pub struct FixedTimeoutTrigger {
    lead_time: Duration,
    min_delay: Duration,
    valid_ttl_threshold: Duration,
    max_jitter: Duration,
}

impl FixedTimeoutTrigger {
    pub fn new(lead_time: Duration) -> Self {
        Self {
            lead_time,
            min_delay: MIN_RENEWAL_DELAY,
            valid_ttl_threshold: lead_time + DEFAULT_THRESHOLD_MARGIN,
            max_jitter: Duration::ZERO,
        }
    }

    pub fn with_valid_ttl_threshold(mut self, threshold: Duration) -> Self {
        self.valid_ttl_threshold = threshold;
        self
    }

    /// Spread renewals of many entities sharing a lead time. Capped at the lead
    /// time itself so renewal never slips past the expiry margin.
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter.min(self.lead_time);
        self
    }

    pub fn lead_time(&self) -> Duration {
        self.lead_time
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    /// Delay without jitter.
    pub fn base_delay(&self, ttl: Duration) -> Duration {
        ttl.saturating_sub(self.lead_time).max(self.min_delay)
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl fmt::Debug for FixedTimeoutTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedTimeoutTrigger")
            .field("lead_time", &self.lead_time)
            .field("valid_ttl_threshold", &self.valid_ttl_threshold)
            .field("max_jitter", &self.max_jitter)
            .finish()
    }
}

impl RefreshTrigger for FixedTimeoutTrigger {
    fn next_execution(&self, ttl: Duration) -> Option<Duration> {
        let delay = ttl.saturating_sub(self.lead_time).saturating_sub(self.jitter());
        Some(delay.max(self.min_delay))
    }

    fn valid_ttl_threshold(&self, _ttl: Duration) -> Duration {
        self.valid_ttl_threshold
    }
}
