//! kinsync core - Mutation Pipeline and endpoints
//!
//! The server half of the synchronization core:
//! - Authorizes every call against the Session Authority
//! - Validates and persists writes, then publishes one `DomainEvent` each
//! - Serves tenant-filtered reads and the bootstrap snapshot
//! - Manages administrator accounts and logins
//!
//! # Example
//!
//! ```rust,ignore
//! use kinsync_core::{SessionContext, SyncConfig, SyncServer};
//! use kinsync_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let server = SyncServer::new(Arc::new(MemoryStore::new()), SyncConfig::new())?;
//! let login = server.login_admin("ada@example.org", "pw").await?;
//! let ctx = SessionContext::new(login.token);
//! let profiles = server.list_profiles(&ctx).await?;
//! ```

#![allow(missing_docs)]

pub mod accounts;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod reads;
pub mod server;

pub use config::SyncConfig;
pub use context::SessionContext;
pub use error::{ConfigError, SyncError};
pub use server::SyncServer;
