//! Domain events carried by the broadcast bus
//!
//! An event describes one committed mutation. It has no identity of its own
//! beyond its payload and is never replayed; receivers treat it as a change
//! notification and fall back to a full snapshot when they miss any.
//!
//! ## Wire Format
//!
//! ```text
//! {"tenant_id":"…","payload":{"kind":"NoteAdded","data":{…}}}
//! ```

use crate::ids::{ProfileId, TenantId};
use crate::records::{EmotionSample, GameResult, ManagedProfile, Note};
use serde::{Deserialize, Serialize};

/// Discriminant of a domain event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ProfileCreated,
    ProfileUpdated,
    ProfileDeleted,
    ProfileStatusChanged,
    NoteAdded,
    EmotionRecorded,
    GameResultRecorded,
}

impl EventKind {
    /// Metric/log label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ProfileCreated => "profile_created",
            EventKind::ProfileUpdated => "profile_updated",
            EventKind::ProfileDeleted => "profile_deleted",
            EventKind::ProfileStatusChanged => "profile_status_changed",
            EventKind::NoteAdded => "note_added",
            EventKind::EmotionRecorded => "emotion_recorded",
            EventKind::GameResultRecorded => "game_result_recorded",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event body, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EventPayload {
    ProfileCreated(ManagedProfile),
    ProfileUpdated(ManagedProfile),
    ProfileDeleted { profile_id: ProfileId },
    ProfileStatusChanged(ManagedProfile),
    NoteAdded(Note),
    EmotionRecorded(EmotionSample),
    GameResultRecorded(GameResult),
}

impl EventPayload {
    /// Kind of this payload
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ProfileCreated(_) => EventKind::ProfileCreated,
            EventPayload::ProfileUpdated(_) => EventKind::ProfileUpdated,
            EventPayload::ProfileDeleted { .. } => EventKind::ProfileDeleted,
            EventPayload::ProfileStatusChanged(_) => EventKind::ProfileStatusChanged,
            EventPayload::NoteAdded(_) => EventKind::NoteAdded,
            EventPayload::EmotionRecorded(_) => EventKind::EmotionRecorded,
            EventPayload::GameResultRecorded(_) => EventKind::GameResultRecorded,
        }
    }

    /// Profile the payload concerns
    #[must_use]
    pub fn profile_id(&self) -> ProfileId {
        match self {
            EventPayload::ProfileCreated(p)
            | EventPayload::ProfileUpdated(p)
            | EventPayload::ProfileStatusChanged(p) => p.id,
            EventPayload::ProfileDeleted { profile_id } => *profile_id,
            EventPayload::NoteAdded(n) => n.profile_id,
            EventPayload::EmotionRecorded(e) => e.profile_id,
            EventPayload::GameResultRecorded(g) => g.profile_id,
        }
    }
}

/// One committed mutation, routed by tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub tenant_id: TenantId,
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Build an event for `tenant_id`
    #[inline]
    #[must_use]
    pub fn new(tenant_id: TenantId, payload: EventPayload) -> Self {
        Self { tenant_id, payload }
    }

    /// Kind of the carried payload
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Encode for the event channel
    ///
    /// # Errors
    /// Propagates `serde_json` failures
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a frame received on the event channel
    ///
    /// # Errors
    /// Propagates `serde_json` failures
    pub fn from_wire(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
