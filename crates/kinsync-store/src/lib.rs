//! kinsync store - Tenant-Scoped Store
//!
//! Durable record of profiles, notes, emotion samples, game results and
//! administrator accounts. Tenant filtering happens inside the store, never in
//! callers.
//!
//! # Example
//!
//! ```rust,ignore
//! use kinsync_store::{MemoryStore, TenantStore};
//!
//! let store = MemoryStore::new();
//! let profiles = store.list_profiles(tenant).await?;
//! ```

#![allow(missing_docs)]

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use traits::TenantStore;
