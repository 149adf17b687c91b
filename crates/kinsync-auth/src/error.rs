//! Session authority errors

/// Failure to issue or verify a credential
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Role/tenant combination cannot be issued
    #[error("invalid actor: {0}")]
    InvalidActor(&'static str),

    /// Credential is past `expires_at`
    #[error("credential expired")]
    Expired,

    /// Structure or signature does not check out
    #[error("malformed credential")]
    Malformed,

    /// Subject was deactivated (or removed) after issuance
    #[error("credential revoked")]
    Revoked,

    /// Activity lookup could not reach the store
    #[error("subject lookup unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// Whether retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
