//! Connection states of a reconciling session

use crate::error::ClientError;
use std::fmt;

/// Lifecycle state of one session's reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No subscription; waiting to (re)connect
    Disconnected,
    /// Subscribed and fetching the authoritative snapshot
    Bootstrapping,
    /// Snapshot installed; merging events as they arrive
    Live,
    /// Session closed or its credential rejected; terminal
    Closed,
}

impl SyncState {
    /// Every state, in lifecycle order
    pub const ALL: [SyncState; 4] = [
        SyncState::Disconnected,
        SyncState::Bootstrapping,
        SyncState::Live,
        SyncState::Closed,
    ];
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Bootstrapping => "bootstrapping",
            Self::Live => "live",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Validates a state transition.
///
/// # Errors
/// `ClientError::IllegalTransition` when `to` is not reachable from `from`
pub fn validate_transition(from: SyncState, to: SyncState) -> Result<(), ClientError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(ClientError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: SyncState) -> Vec<SyncState> {
    use SyncState::{Bootstrapping, Closed, Disconnected, Live};
    match from {
        Disconnected => vec![Bootstrapping, Closed],
        Bootstrapping => vec![Live, Disconnected, Closed],
        Live => vec![Disconnected, Closed],
        Closed => vec![],
    }
}

fn allowed(from: SyncState, to: SyncState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
