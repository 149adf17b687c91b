//! Identifier newtypes and actor roles
//!
//! Every identifier is a UUID v4 wrapped in its own type so a profile id can
//! never be passed where a tenant id is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Ownership scope of an administrator; every record belongs to exactly one
    TenantId
);
uuid_id!(
    /// Identity bound into a credential (admin account or managed profile)
    SubjectId
);
uuid_id!(
    /// Managed ("child") profile identifier
    ProfileId
);
uuid_id!(
    /// Note identifier
    NoteId
);

impl From<ProfileId> for SubjectId {
    fn from(value: ProfileId) -> Self {
        SubjectId(value.0)
    }
}

impl From<SubjectId> for ProfileId {
    fn from(value: SubjectId) -> Self {
        ProfileId(value.0)
    }
}

/// Actor role carried by a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Tenant administrator (dashboard user)
    Admin,
    /// Managed profile playing the games
    Child,
    /// Operator managing administrator accounts
    SuperAdmin,
}

impl Role {
    /// Whether credentials of this role must be bound to a tenant
    #[inline]
    #[must_use]
    pub fn requires_tenant(self) -> bool {
        matches!(self, Role::Admin | Role::Child)
    }

    /// Stable byte tag used in signed messages
    #[inline]
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Role::Admin => 1,
            Role::Child => 2,
            Role::SuperAdmin => 3,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Child => "child",
            Role::SuperAdmin => "superadmin",
        };
        f.write_str(name)
    }
}
