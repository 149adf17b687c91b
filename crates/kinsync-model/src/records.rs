//! Tenant-owned records
//!
//! Every record except the credential carries the owning `TenantId`. Notes
//! denormalize the tenant from their profile at creation time so authorization
//! never needs a join.

use crate::ids::{NoteId, ProfileId, Role, SubjectId, TenantId};
use crate::validation::LoginCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The monitored child account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedProfile {
    pub id: ProfileId,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub contact: String,
    pub login_code: LoginCode,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Stamped by the store; grows with every change to the profile
    #[serde(default)]
    pub revision: u64,
}

/// Free-text note written by an administrator about a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub profile_id: ProfileId,
    pub tenant_id: TenantId,
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Emotion detected while the child played
///
/// `observed_at` is the ordering key; arrival order is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionSample {
    pub profile_id: ProfileId,
    pub tenant_id: TenantId,
    pub label: String,
    pub context: String,
    pub observed_at: DateTime<Utc>,
}

/// Outcome of one game round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub profile_id: ProfileId,
    pub tenant_id: TenantId,
    pub score: u32,
    pub emotion_labels: Vec<String>,
    pub context: String,
    pub correct: bool,
    pub completed_at: DateTime<Utc>,
}

/// Administrator or super-administrator account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAccount {
    pub id: SubjectId,
    pub role: Role,
    /// `Some` for `Role::Admin`, `None` for `Role::SuperAdmin`
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request body for `createProfile`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfile {
    pub display_name: String,
    pub contact: String,
    pub login_code: String,
    pub secret: String,
}

/// Request body for `updateProfile`; absent fields stay unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub contact: Option<String>,
    pub login_code: Option<String>,
}

impl ProfileChanges {
    /// True when nothing would change
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.contact.is_none() && self.login_code.is_none()
    }
}

/// Validated profile changes as applied by the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub contact: Option<String>,
    pub login_code: Option<LoginCode>,
}

/// Request body for `addNote`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNote {
    pub text: String,
}

/// Request body for `recordEmotionSample`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmotionSample {
    pub label: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Request body for `recordGameResult`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGameResult {
    pub score: u32,
    #[serde(default)]
    pub emotion_labels: Vec<String>,
    #[serde(default)]
    pub context: String,
    pub correct: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Full authorized state of one tenant, used to bootstrap a client view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub tenant_id: TenantId,
    pub profiles: Vec<ManagedProfile>,
    pub notes: Vec<Note>,
    pub emotions: Vec<EmotionSample>,
    pub games: Vec<GameResult>,
}

impl TenantSnapshot {
    /// Snapshot of a tenant with no records
    #[must_use]
    pub fn empty(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            profiles: Vec::new(),
            notes: Vec::new(),
            emotions: Vec::new(),
            games: Vec::new(),
        }
    }
}
