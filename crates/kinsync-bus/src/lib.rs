//! kinsync bus - Broadcast Bus
//!
//! Delivers each committed domain event to every live session of the
//! originating tenant, and only that tenant.
//!
//! # Example
//!
//! ```rust,ignore
//! use kinsync_bus::{BroadcastBus, SessionId};
//!
//! let bus = BroadcastBus::new();
//! let mut subscription = bus.subscribe(SessionId::new(), tenant);
//! bus.publish(&event);
//! assert_eq!(subscription.next().await, Some(event));
//! ```

#![allow(missing_docs)]

pub mod bus;
pub mod session;

pub use bus::{BroadcastBus, Subscription};
pub use session::SessionId;
