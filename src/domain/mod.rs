//! Domain layer
//!
//! Immutable value types shared by the session and lease engines. None of
//! these types perform I/O.
//!
//! - `credential`: Vault token plus lease metadata
//! - `lease`: secret lease (with the "no lease" sentinel)
//! - `secret`: fetched secret payloads
//! - `sensitive`: redacting wrapper for token values
//! - `id`: type-safe handles

pub mod credential;
pub mod id;
pub mod lease;
pub mod secret;
pub mod sensitive;

pub use credential::{Credential, CredentialKind};
pub use id::SecretHandle;
pub use lease::Lease;
pub use secret::{SecretData, SecretResponse};
pub use sensitive::SecretString;
