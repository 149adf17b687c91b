//! kinsync model
//!
//! Shared vocabulary of the synchronization core:
//! - Identifier newtypes and actor roles
//! - Tenant-owned records (profiles, notes, telemetry, accounts)
//! - Domain events and their wire codec
//! - Input validation

#![allow(missing_docs)]

pub mod event;
pub mod ids;
pub mod records;
pub mod validation;

pub use event::{DomainEvent, EventKind, EventPayload};
pub use ids::{NoteId, ProfileId, Role, SubjectId, TenantId};
pub use records::{
    AdminAccount, EmotionSample, GameResult, ManagedProfile, NewEmotionSample, NewGameResult,
    NewNote, NewProfile, Note, ProfileChanges, ProfilePatch, TenantSnapshot,
};
pub use validation::{LoginCode, ValidationError};
