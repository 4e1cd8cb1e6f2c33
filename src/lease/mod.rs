//! Secret lease management
//!
//! [`LeaseEngine`] fetches registered secrets, renews their leases ahead of
//! expiry and, for rotating secrets, fetches a replacement once a lease is
//! lost.

pub mod engine;
pub mod requested;
pub mod strategy;

pub use engine::{LeaseEngine, LeaseEngineBuilder, SecretSnapshot};
pub use requested::{RequestedSecret, RequestedSecretMode};
pub use strategy::LeaseStrategy;
