use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::LifecycleError;

/// What to do with a lease whose renewal failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseStrategy {
    /// Treat the lease as expired on any renewal error.
    #[default]
    DropOnError,
    /// Keep the lease after transient errors and retry on the next cycle.
    /// Terminal errors still drop it.
    RetainOnTransientError,
}

impl LeaseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropOnError => "drop-on-error",
            Self::RetainOnTransientError => "retain-on-transient-error",
        }
    }

    /// Whether the current lease survives a renewal failure with `error`.
    pub fn retains(&self, error: &LifecycleError) -> bool {
        match self {
            Self::DropOnError => false,
            Self::RetainOnTransientError => error.is_transient(),
        }
    }
}

impl fmt::Display for LeaseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseStrategy {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-on-error" | "drop_on_error" => Ok(Self::DropOnError),
            "retain-on-transient-error" | "retain_on_transient_error" => {
                Ok(Self::RetainOnTransientError)
            }
            other => Err(LifecycleError::config(format!("Unknown lease strategy '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_on_error_never_retains() {
        let strategy = LeaseStrategy::default();
        assert_eq!(strategy, LeaseStrategy::DropOnError);
        assert!(!strategy.retains(&LifecycleError::transport("connection refused")));
        assert!(!strategy.retains(&LifecycleError::not_found("lease")));
    }

    #[test]
    fn test_retain_only_on_transient_errors() {
        let strategy = LeaseStrategy::RetainOnTransientError;
        assert!(strategy.retains(&LifecycleError::rejected(503, "sealed")));
        assert!(!strategy.retains(&LifecycleError::permission_denied("permission denied")));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(
            "retain-on-transient-error".parse::<LeaseStrategy>().unwrap().to_string(),
            "retain-on-transient-error"
        );
        assert_eq!("DROP_ON_ERROR".parse::<LeaseStrategy>().unwrap(), LeaseStrategy::DropOnError);
        assert!("sometimes".parse::<LeaseStrategy>().is_err());
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&LeaseStrategy::RetainOnTransientError).unwrap();
        assert_eq!(json, "\"retain-on-transient-error\"");
    }
}
