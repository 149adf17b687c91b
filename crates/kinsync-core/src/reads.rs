//! Tenant-filtered read endpoints and the bootstrap snapshot
//!
//! The tenant always comes from the verified credential. A profile of another
//! tenant reads as `NotFound`.

use crate::context::SessionContext;
use crate::error::SyncError;
use crate::server::{own_profile, tenant_of, SyncServer};
use kinsync_auth::Credential;
use kinsync_model::{
    EmotionSample, GameResult, ManagedProfile, Note, ProfileId, Role, TenantId, TenantSnapshot,
};

impl SyncServer {
    /// Profiles of the caller's tenant, newest first
    ///
    /// # Errors
    /// Authorization failures, `Unavailable`
    pub async fn list_profiles(&self, ctx: &SessionContext) -> Result<Vec<ManagedProfile>, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            Ok(self.store.list_profiles(tenant_of(&credential)?).await?)
        }
        .await;
        self.finish("list_profiles", outcome)
    }

    /// Notes of one profile, newest first
    ///
    /// # Errors
    /// `NotFound` for profiles outside the caller's tenant
    pub async fn list_notes(
        &self,
        ctx: &SessionContext,
        profile_id: ProfileId,
    ) -> Result<Vec<Note>, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            Ok(self.store.list_notes(tenant_of(&credential)?, profile_id).await?)
        }
        .await;
        self.finish("list_notes", outcome)
    }

    /// Emotion samples of one profile, by observation time
    ///
    /// Administrators read any profile of their tenant; a child reads only
    /// its own.
    ///
    /// # Errors
    /// `NotFound` for profiles outside the caller's reach
    pub async fn list_emotion_samples(
        &self,
        ctx: &SessionContext,
        profile_id: ProfileId,
    ) -> Result<Vec<EmotionSample>, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin, Role::Child]).await?;
            let tenant = readable_tenant(&credential, profile_id)?;
            Ok(self.store.list_emotions(tenant, profile_id).await?)
        }
        .await;
        self.finish("list_emotion_samples", outcome)
    }

    /// Game results of one profile, by completion time
    ///
    /// # Errors
    /// `NotFound` for profiles outside the caller's reach
    pub async fn list_game_results(
        &self,
        ctx: &SessionContext,
        profile_id: ProfileId,
    ) -> Result<Vec<GameResult>, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin, Role::Child]).await?;
            let tenant = readable_tenant(&credential, profile_id)?;
            Ok(self.store.list_game_results(tenant, profile_id).await?)
        }
        .await;
        self.finish("list_game_results", outcome)
    }

    /// Full authorized state of the caller's tenant
    ///
    /// Built only from the tenant-filtered listings. A profile deleted while
    /// the snapshot is being assembled is left out together with its records.
    ///
    /// # Errors
    /// Authorization failures, `Unavailable`
    pub async fn fetch_snapshot(&self, ctx: &SessionContext) -> Result<TenantSnapshot, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            self.snapshot_of(tenant_of(&credential)?).await
        }
        .await;
        self.finish("fetch_snapshot", outcome)
    }

    async fn snapshot_of(&self, tenant: TenantId) -> Result<TenantSnapshot, SyncError> {
        let mut snapshot = TenantSnapshot::empty(tenant);

        for profile in self.store.list_profiles(tenant).await? {
            let records = async {
                let notes = self.store.list_notes(tenant, profile.id).await?;
                let emotions = self.store.list_emotions(tenant, profile.id).await?;
                let games = self.store.list_game_results(tenant, profile.id).await?;
                Ok::<_, SyncError>((notes, emotions, games))
            }
            .await;

            match records {
                Ok((notes, emotions, games)) => {
                    snapshot.notes.extend(notes);
                    snapshot.emotions.extend(emotions);
                    snapshot.games.extend(games);
                    snapshot.profiles.push(profile);
                }
                Err(SyncError::NotFound) => {
                    tracing::debug!(tenant = %tenant, profile = %profile.id, "profile vanished during snapshot");
                }
                Err(err) => return Err(err),
            }
        }

        snapshot
            .notes
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        snapshot.emotions.sort_by(|a, b| a.observed_at.cmp(&b.observed_at));
        snapshot.games.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));

        tracing::debug!(
            tenant = %tenant,
            profiles = snapshot.profiles.len(),
            notes = snapshot.notes.len(),
            "snapshot assembled"
        );
        Ok(snapshot)
    }
}

/// Tenant under which `credential` may read `profile_id`'s telemetry
fn readable_tenant(credential: &Credential, profile_id: ProfileId) -> Result<TenantId, SyncError> {
    let tenant = tenant_of(credential)?;
    if credential.role == Role::Child && own_profile(credential) != profile_id {
        return Err(SyncError::NotFound);
    }
    Ok(tenant)
}
