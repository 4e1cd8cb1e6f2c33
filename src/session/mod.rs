//! Token session management
//!
//! [`SessionEngine`] logs in through a
//! [`ClientAuthenticator`](crate::transport::ClientAuthenticator),
//! renews the token ahead of expiry and re-authenticates when the token is
//! lost. [`BlockingSession`] exposes the same session to synchronous callers.

pub mod blocking;
pub mod engine;

pub use blocking::BlockingSession;
pub use engine::{SessionEngine, SessionEngineBuilder, SessionState};
