//! Mutation Pipeline
//!
//! Every write runs the same four steps:
//! 1. Verify the credential and its role
//! 2. Validate input shape and tenant ownership
//! 3. Apply to the store
//! 4. Publish the resulting `DomainEvent`
//!
//! Step 4 runs only after step 3 succeeded. A failed persist publishes
//! nothing; a publish that reaches nobody never rolls back the persist.
//!
//! Concurrent writes take no lock beyond the store's own, so two writes to
//! one profile may publish in the opposite order of their commits. The store
//! stamps each profile change with a `revision` for views to order by.

use crate::context::SessionContext;
use crate::error::SyncError;
use crate::server::{own_profile, tenant_of, SyncServer};
use chrono::Utc;
use kinsync_auth::{temporary_secret, SecretHash};
use kinsync_model::validation::{contact, required_text};
use kinsync_model::{
    DomainEvent, EmotionSample, EventPayload, GameResult, LoginCode, ManagedProfile,
    NewEmotionSample, NewGameResult, NewNote, NewProfile, Note, NoteId, ProfileChanges, ProfileId,
    ProfilePatch, Role, ValidationError,
};

const MAX_NAME_LEN: usize = 100;
const MAX_SECRET_LEN: usize = 128;
const MAX_LABEL_LEN: usize = 64;
const MAX_CONTEXT_LEN: usize = 500;

impl SyncServer {
    /// Register a managed profile under the caller's tenant
    ///
    /// # Errors
    /// `Validation` on malformed fields, `Conflict` when the login code or
    /// contact is taken anywhere in the store
    pub async fn create_profile(
        &self,
        ctx: &SessionContext,
        input: NewProfile,
    ) -> Result<ManagedProfile, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            let tenant = tenant_of(&credential)?;

            let profile = ManagedProfile {
                id: ProfileId::new(),
                tenant_id: tenant,
                display_name: required_text("display name", &input.display_name, MAX_NAME_LEN)?,
                contact: contact(&input.contact)?,
                login_code: LoginCode::parse(&input.login_code)?,
                active: true,
                created_at: Utc::now(),
                revision: 0,
            };
            let secret = required_text("secret", &input.secret, MAX_SECRET_LEN)?;

            let profile = self
                .store
                .insert_profile(profile, SecretHash::derive(&secret))
                .await?;
            self.commit(&DomainEvent::new(
                tenant,
                EventPayload::ProfileCreated(profile.clone()),
            ));
            Ok(profile)
        }
        .await;
        self.finish("create_profile", outcome)
    }

    /// Change display name, contact or login code
    ///
    /// # Errors
    /// `NotFound` for profiles outside the caller's tenant, `Conflict` when the
    /// new login code or contact belongs to another profile
    pub async fn update_profile(
        &self,
        ctx: &SessionContext,
        profile_id: ProfileId,
        changes: ProfileChanges,
    ) -> Result<ManagedProfile, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            let tenant = tenant_of(&credential)?;

            if changes.is_empty() {
                return Err(ValidationError::Required("profile changes").into());
            }
            let patch = ProfilePatch {
                display_name: changes
                    .display_name
                    .as_deref()
                    .map(|name| required_text("display name", name, MAX_NAME_LEN))
                    .transpose()?,
                contact: changes.contact.as_deref().map(contact).transpose()?,
                login_code: changes
                    .login_code
                    .as_deref()
                    .map(LoginCode::parse)
                    .transpose()?,
            };

            let profile = self.store.update_profile(tenant, profile_id, patch).await?;
            self.commit(&DomainEvent::new(
                tenant,
                EventPayload::ProfileUpdated(profile.clone()),
            ));
            Ok(profile)
        }
        .await;
        self.finish("update_profile", outcome)
    }

    /// Delete a profile and everything recorded about it
    ///
    /// The profile deletion is authoritative. Dependent-record cleanup runs
    /// afterwards; a cleanup failure is logged and not retried, and read paths
    /// already refuse records of a missing profile.
    ///
    /// # Errors
    /// `NotFound` for profiles outside the caller's tenant
    pub async fn delete_profile(
        &self,
        ctx: &SessionContext,
        profile_id: ProfileId,
    ) -> Result<(), SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            let tenant = tenant_of(&credential)?;

            self.store.delete_profile(tenant, profile_id).await?;

            match self.store.delete_notes_for_profile(tenant, profile_id).await {
                Ok(removed) => tracing::debug!(profile = %profile_id, removed, "notes removed"),
                Err(err) => tracing::warn!(
                    tenant = %tenant,
                    profile = %profile_id,
                    error = %err,
                    "note cleanup failed after profile deletion"
                ),
            }
            match self.store.delete_telemetry_for_profile(tenant, profile_id).await {
                Ok(removed) => tracing::debug!(profile = %profile_id, removed, "telemetry removed"),
                Err(err) => tracing::warn!(
                    tenant = %tenant,
                    profile = %profile_id,
                    error = %err,
                    "telemetry cleanup failed after profile deletion"
                ),
            }

            self.commit(&DomainEvent::new(
                tenant,
                EventPayload::ProfileDeleted { profile_id },
            ));
            Ok(())
        }
        .await;
        self.finish("delete_profile", outcome)
    }

    /// Replace the profile's login secret with a random temporary one
    ///
    /// Returns the plaintext once; only its hash is stored. Nothing visible in
    /// a dashboard view changes, so no event is published.
    ///
    /// # Errors
    /// `NotFound` for profiles outside the caller's tenant
    pub async fn reset_profile_secret(
        &self,
        ctx: &SessionContext,
        profile_id: ProfileId,
    ) -> Result<String, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            let tenant = tenant_of(&credential)?;

            let secret = temporary_secret(self.config.temporary_secret_bytes);
            self.store
                .set_profile_secret(tenant, profile_id, SecretHash::derive(&secret))
                .await?;
            tracing::info!(tenant = %tenant, profile = %profile_id, "profile secret reset");
            Ok(secret)
        }
        .await;
        self.finish("reset_profile_secret", outcome)
    }

    /// Activate or deactivate a profile
    ///
    /// A deactivated profile can no longer log in, and credentials issued to
    /// it before deactivation stop verifying.
    ///
    /// # Errors
    /// `NotFound` for profiles outside the caller's tenant
    pub async fn set_profile_active(
        &self,
        ctx: &SessionContext,
        profile_id: ProfileId,
        active: bool,
    ) -> Result<ManagedProfile, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            let tenant = tenant_of(&credential)?;

            let profile = self.store.set_profile_active(tenant, profile_id, active).await?;
            self.commit(&DomainEvent::new(
                tenant,
                EventPayload::ProfileStatusChanged(profile.clone()),
            ));
            Ok(profile)
        }
        .await;
        self.finish("set_profile_active", outcome)
    }

    /// Append a note to a profile of the caller's tenant
    ///
    /// The note's tenant is copied from the profile and its author name from
    /// the credential.
    ///
    /// # Errors
    /// `NotFound` for profiles outside the caller's tenant, `Validation` for
    /// blank or overlong text
    pub async fn add_note(
        &self,
        ctx: &SessionContext,
        profile_id: ProfileId,
        input: NewNote,
    ) -> Result<Note, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            let tenant = tenant_of(&credential)?;
            let text = required_text("text", &input.text, self.config.max_note_len)?;

            let profile = self.store.get_profile(tenant, profile_id).await?;
            let note = Note {
                id: NoteId::new(),
                profile_id: profile.id,
                tenant_id: profile.tenant_id,
                author_name: credential.display_name.clone(),
                text,
                created_at: Utc::now(),
            };

            let note = self.store.insert_note(note).await?;
            self.commit(&DomainEvent::new(tenant, EventPayload::NoteAdded(note.clone())));
            Ok(note)
        }
        .await;
        self.finish("add_note", outcome)
    }

    /// Record an emotion detected while the calling child played
    ///
    /// Child only; profile and tenant come from the credential.
    ///
    /// # Errors
    /// `Forbidden` for non-child callers, `Validation` for a blank label
    pub async fn record_emotion_sample(
        &self,
        ctx: &SessionContext,
        input: NewEmotionSample,
    ) -> Result<EmotionSample, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Child]).await?;
            let tenant = tenant_of(&credential)?;

            let sample = EmotionSample {
                profile_id: own_profile(&credential),
                tenant_id: tenant,
                label: required_text("label", &input.label, MAX_LABEL_LEN)?,
                context: optional_text("context", &input.context, MAX_CONTEXT_LEN)?,
                observed_at: input.observed_at.unwrap_or_else(Utc::now),
            };

            let sample = self.store.insert_emotion(sample).await?;
            self.commit(&DomainEvent::new(
                tenant,
                EventPayload::EmotionRecorded(sample.clone()),
            ));
            Ok(sample)
        }
        .await;
        self.finish("record_emotion_sample", outcome)
    }

    /// Record the outcome of one game round played by the calling child
    ///
    /// # Errors
    /// `Forbidden` for non-child callers, `Validation` for blank emotion labels
    pub async fn record_game_result(
        &self,
        ctx: &SessionContext,
        input: NewGameResult,
    ) -> Result<GameResult, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Child]).await?;
            let tenant = tenant_of(&credential)?;

            let emotion_labels = input
                .emotion_labels
                .iter()
                .map(|label| required_text("emotion label", label, MAX_LABEL_LEN))
                .collect::<Result<Vec<_>, _>>()?;
            let result = GameResult {
                profile_id: own_profile(&credential),
                tenant_id: tenant,
                score: input.score,
                emotion_labels,
                context: optional_text("context", &input.context, MAX_CONTEXT_LEN)?,
                correct: input.correct,
                completed_at: input.completed_at.unwrap_or_else(Utc::now),
            };

            let result = self.store.insert_game_result(result).await?;
            self.commit(&DomainEvent::new(
                tenant,
                EventPayload::GameResultRecorded(result.clone()),
            ));
            Ok(result)
        }
        .await;
        self.finish("record_game_result", outcome)
    }
}

/// Trimmed text that may be empty
fn optional_text(field: &'static str, raw: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_text_allows_blank() {
        assert_eq!(optional_text("context", "  ", 10), Ok(String::new()));
        assert_eq!(
            optional_text("context", "abcdefghijk", 10),
            Err(ValidationError::TooLong {
                field: "context",
                max: 10
            })
        );
    }
}
