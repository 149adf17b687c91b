//! Tenant-scoped store interface
//!
//! Every profile-derived read, update and delete takes the caller's tenant and
//! filters by it inside the store. A record owned by another tenant is reported
//! as `StoreError::NotFound`, indistinguishable from absence.
//!
//! Uniqueness of `login_code` and `contact` (profiles) and `email` (accounts)
//! is store-wide, not per tenant.

use crate::error::StoreResult;
use async_trait::async_trait;
use kinsync_auth::SecretHash;
use kinsync_model::{
    AdminAccount, EmotionSample, GameResult, LoginCode, ManagedProfile, Note, ProfileId,
    ProfilePatch, SubjectId, TenantId,
};

/// Persistence for the four tenant-owned record kinds plus accounts
#[async_trait]
pub trait TenantStore: Send + Sync {
    // --- Managed profiles ---

    /// Insert a new profile; `Conflict` on duplicate login code or contact
    async fn insert_profile(
        &self,
        profile: ManagedProfile,
        secret: SecretHash,
    ) -> StoreResult<ManagedProfile>;

    /// Profile owned by `tenant`
    async fn get_profile(&self, tenant: TenantId, id: ProfileId) -> StoreResult<ManagedProfile>;

    /// All profiles of `tenant`, newest first
    async fn list_profiles(&self, tenant: TenantId) -> StoreResult<Vec<ManagedProfile>>;

    /// Apply a patch; uniqueness re-checked against every other profile
    async fn update_profile(
        &self,
        tenant: TenantId,
        id: ProfileId,
        patch: ProfilePatch,
    ) -> StoreResult<ManagedProfile>;

    /// Toggle the active flag
    async fn set_profile_active(
        &self,
        tenant: TenantId,
        id: ProfileId,
        active: bool,
    ) -> StoreResult<ManagedProfile>;

    /// Replace the login secret hash
    async fn set_profile_secret(
        &self,
        tenant: TenantId,
        id: ProfileId,
        secret: SecretHash,
    ) -> StoreResult<()>;

    /// Remove the profile record only; dependent records are cleaned separately
    async fn delete_profile(&self, tenant: TenantId, id: ProfileId) -> StoreResult<ManagedProfile>;

    /// Store-wide lookup used by child login
    async fn find_login(&self, code: &LoginCode) -> StoreResult<Option<(ManagedProfile, SecretHash)>>;

    // --- Notes ---

    /// Append a note; its profile must exist under `note.tenant_id`
    async fn insert_note(&self, note: Note) -> StoreResult<Note>;

    /// Notes of a profile owned by `tenant`, newest first
    async fn list_notes(&self, tenant: TenantId, profile: ProfileId) -> StoreResult<Vec<Note>>;

    /// Cascade helper; returns the number of notes removed
    async fn delete_notes_for_profile(&self, tenant: TenantId, profile: ProfileId)
        -> StoreResult<usize>;

    // --- Telemetry ---

    /// Append an emotion sample
    async fn insert_emotion(&self, sample: EmotionSample) -> StoreResult<EmotionSample>;

    /// Samples ordered by `observed_at`
    async fn list_emotions(
        &self,
        tenant: TenantId,
        profile: ProfileId,
    ) -> StoreResult<Vec<EmotionSample>>;

    /// Append a game result
    async fn insert_game_result(&self, result: GameResult) -> StoreResult<GameResult>;

    /// Results ordered by `completed_at`
    async fn list_game_results(
        &self,
        tenant: TenantId,
        profile: ProfileId,
    ) -> StoreResult<Vec<GameResult>>;

    /// Cascade helper; returns the number of samples and results removed
    async fn delete_telemetry_for_profile(
        &self,
        tenant: TenantId,
        profile: ProfileId,
    ) -> StoreResult<usize>;

    // --- Accounts ---

    /// Insert an administrator account; `Conflict` on duplicate email
    async fn insert_admin(&self, account: AdminAccount, secret: SecretHash)
        -> StoreResult<AdminAccount>;

    /// Lookup by (lower-cased) email
    async fn find_admin_by_email(&self, email: &str)
        -> StoreResult<Option<(AdminAccount, SecretHash)>>;

    /// Account by id
    async fn get_admin(&self, id: SubjectId) -> StoreResult<AdminAccount>;

    /// Toggle the active flag of an account
    async fn set_admin_active(&self, id: SubjectId, active: bool) -> StoreResult<AdminAccount>;

    /// Every account, oldest first
    async fn list_admins(&self) -> StoreResult<Vec<AdminAccount>>;
}
