//! kinsync client - Client Reconciliation State Machine
//!
//! Keeps one administrator session's view of its tenant consistent with the
//! server: a full snapshot on every (re)connect, then idempotent merges of
//! live events.
//!
//! # Example
//!
//! ```rust,ignore
//! use kinsync_client::{ReconciliationMachine, SyncState};
//!
//! let handle = ReconciliationMachine::connect(server, ctx, config).await?;
//! handle.wait_for_state(SyncState::Live).await?;
//! let profiles = handle.view().profiles().len();
//! handle.close().await;
//! ```

#![allow(missing_docs)]

pub mod error;
pub mod machine;
pub mod source;
pub mod state;
pub mod view;

pub use error::ClientError;
pub use machine::{ReconciliationMachine, SessionHandle};
pub use source::SyncSource;
pub use state::{allowed_transitions, validate_transition, SyncState};
pub use view::{canonical, LocalView, MergeOutcome};
