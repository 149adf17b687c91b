//! Store errors

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Record absent, or owned by a different tenant
    #[error("record not found")]
    NotFound,

    /// Store-wide uniqueness violated on the named field
    #[error("{0} already in use")]
    Conflict(&'static str),

    /// Backend transiently unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
