//! kinsync auth - Session Authority
//!
//! Binds a caller to an actor identity, role and (for tenant-scoped roles) a
//! tenant. Runtime checks are cryptographic and temporal, plus one store read
//! to honour deactivation after issuance.

#![allow(missing_docs)]

pub mod authority;
pub mod credential;
pub mod error;
pub mod secret;

pub use authority::{IssuedCredential, SessionAuthority, SubjectRegistry};
pub use credential::{Credential, SignedCredential};
pub use error::AuthError;
pub use secret::{temporary_secret, SecretHash};
