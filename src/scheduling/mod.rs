//! Renewal timing: when to renew ([`RefreshTrigger`]) and how the delayed
//! work gets executed ([`RenewalScheduler`]).

pub mod manual;
pub mod scheduler;
pub mod trigger;

pub use manual::ManualScheduler;
pub use scheduler::{RenewalScheduler, ScheduledTask, TokioScheduler};
pub use trigger::{
    FixedTimeoutTrigger, OneShotTrigger, RefreshTrigger, DEFAULT_THRESHOLD_MARGIN,
    MIN_RENEWAL_DELAY,
};
