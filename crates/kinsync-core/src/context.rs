//! Per-session call context

use kinsync_bus::SessionId;

/// Identity material threaded through every endpoint call
///
/// Carries the bearer token and the session's bus identity explicitly; nothing
/// is read from ambient state.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub token: String,
}

impl SessionContext {
    /// Context for a new session
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(),
            token: token.into(),
        }
    }

    /// Context reusing an existing session id
    #[must_use]
    pub fn with_session(session_id: SessionId, token: impl Into<String>) -> Self {
        Self {
            session_id,
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("token", &"<redacted>")
            .finish()
    }
}
