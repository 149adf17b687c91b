//! Client errors

use crate::state::SyncState;

/// Reconciliation failure surfaced to the session owner
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// State change not permitted by the lifecycle
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: SyncState, to: SyncState },

    /// The session closed before the awaited condition held
    #[error("session closed")]
    Closed,
}
