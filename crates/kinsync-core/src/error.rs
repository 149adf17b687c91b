//! Error taxonomy at the pipeline boundary
//!
//! Every endpoint returns [`SyncError`]. Lower layers keep their own enums and
//! convert through `From`, so handlers propagate with `?`.

use kinsync_auth::AuthError;
use kinsync_model::ValidationError;
use kinsync_store::StoreError;

/// Failure reported synchronously to the caller of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Missing, invalid or revoked credential, or failed login
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Credential past its validity
    #[error("credential expired")]
    Expired,

    /// Authenticated, but the role may not call this endpoint
    #[error("forbidden")]
    Forbidden,

    /// Record absent, or owned by another tenant
    #[error("not found")]
    NotFound,

    /// Store-wide uniqueness violated on the named field
    #[error("{0} already in use")]
    Conflict(&'static str),

    /// Malformed input
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// Store or bus transiently unreachable
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl SyncError {
    /// Whether the same call may succeed later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Whether the session's credential can no longer be used at all
    #[inline]
    #[must_use]
    pub fn is_terminal_for_session(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Expired | Self::Forbidden)
    }

    /// Stable label for logs and metrics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Expired => "expired",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Expired => Self::Expired,
            AuthError::Malformed => Self::Unauthorized("invalid credential".to_string()),
            AuthError::Revoked => Self::Unauthorized("account deactivated".to_string()),
            AuthError::InvalidActor(reason) => Self::Unauthorized(reason.to_string()),
            AuthError::Unavailable(reason) => Self::Unavailable(reason),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::Conflict(field) => Self::Conflict(field),
            StoreError::Unavailable(reason) => Self::Unavailable(reason),
        }
    }
}

/// Invalid [`crate::SyncConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Signing seed is not 32 hex-encoded bytes
    #[error("signing seed must be 64 hex characters")]
    InvalidSeed,

    /// A value is out of range
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
