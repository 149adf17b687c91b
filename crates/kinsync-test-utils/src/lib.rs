//! Testing utilities for the kinsync workspace
//!
//! Shared fixtures and a fault-injecting store.

#![allow(missing_docs)]

use async_trait::async_trait;
use kinsync_auth::{SecretHash, SubjectRegistry};
use kinsync_core::{SessionContext, SyncConfig, SyncServer};
use kinsync_model::{
    AdminAccount, EmotionSample, GameResult, LoginCode, ManagedProfile, NewProfile, Note,
    ProfileId, ProfilePatch, Role, SubjectId, TenantId,
};
use kinsync_store::{MemoryStore, StoreError, StoreResult, TenantStore};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SUPER_EMAIL: &str = "root@kinsync.test";
pub const PASSWORD: &str = "correct horse";
pub const CHILD_SECRET: &str = "s3cret";

/// `MemoryStore` wrapper whose calls can be made to fail with `Unavailable`
///
/// Activity lookups for the authority never fail, so writes get past
/// authorization and fail at persistence.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_cleanup: AtomicBool,
    update_stall_ms: AtomicU64,
    reads: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Fail only the dependent-record cleanup of a profile deletion
    pub fn fail_cleanup(&self, on: bool) {
        self.fail_cleanup.store(on, Ordering::SeqCst);
    }

    /// Make the next profile update pause for `stall` after it persisted
    pub fn stall_next_update(&self, stall: Duration) {
        let millis = u64::try_from(stall.as_millis()).unwrap_or(u64::MAX);
        self.update_stall_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of read calls served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected write fault".to_string()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> StoreResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected read fault".to_string()))
        } else {
            Ok(())
        }
    }

    fn cleanup(&self) -> StoreResult<()> {
        if self.fail_cleanup.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected cleanup fault".to_string()))
        } else {
            self.write()
        }
    }
}

#[async_trait]
impl TenantStore for FlakyStore {
    async fn insert_profile(&self, profile: ManagedProfile, secret: SecretHash) -> StoreResult<ManagedProfile> {
        self.write()?;
        self.inner.insert_profile(profile, secret).await
    }

    async fn get_profile(&self, tenant: TenantId, id: ProfileId) -> StoreResult<ManagedProfile> {
        self.read()?;
        self.inner.get_profile(tenant, id).await
    }

    async fn list_profiles(&self, tenant: TenantId) -> StoreResult<Vec<ManagedProfile>> {
        self.read()?;
        self.inner.list_profiles(tenant).await
    }

    async fn update_profile(&self, tenant: TenantId, id: ProfileId, patch: ProfilePatch) -> StoreResult<ManagedProfile> {
        self.write()?;
        let updated = self.inner.update_profile(tenant, id, patch).await?;
        let stall = self.update_stall_ms.swap(0, Ordering::SeqCst);
        if stall > 0 {
            tokio::time::sleep(Duration::from_millis(stall)).await;
        }
        Ok(updated)
    }

    async fn set_profile_active(&self, tenant: TenantId, id: ProfileId, active: bool) -> StoreResult<ManagedProfile> {
        self.write()?;
        self.inner.set_profile_active(tenant, id, active).await
    }

    async fn set_profile_secret(&self, tenant: TenantId, id: ProfileId, secret: SecretHash) -> StoreResult<()> {
        self.write()?;
        self.inner.set_profile_secret(tenant, id, secret).await
    }

    async fn delete_profile(&self, tenant: TenantId, id: ProfileId) -> StoreResult<ManagedProfile> {
        self.write()?;
        self.inner.delete_profile(tenant, id).await
    }

    async fn find_login(&self, code: &LoginCode) -> StoreResult<Option<(ManagedProfile, SecretHash)>> {
        self.read()?;
        self.inner.find_login(code).await
    }

    async fn insert_note(&self, note: Note) -> StoreResult<Note> {
        self.write()?;
        self.inner.insert_note(note).await
    }

    async fn list_notes(&self, tenant: TenantId, profile: ProfileId) -> StoreResult<Vec<Note>> {
        self.read()?;
        self.inner.list_notes(tenant, profile).await
    }

    async fn delete_notes_for_profile(&self, tenant: TenantId, profile: ProfileId) -> StoreResult<usize> {
        self.cleanup()?;
        self.inner.delete_notes_for_profile(tenant, profile).await
    }

    async fn insert_emotion(&self, sample: EmotionSample) -> StoreResult<EmotionSample> {
        self.write()?;
        self.inner.insert_emotion(sample).await
    }

    async fn list_emotions(&self, tenant: TenantId, profile: ProfileId) -> StoreResult<Vec<EmotionSample>> {
        self.read()?;
        self.inner.list_emotions(tenant, profile).await
    }

    async fn insert_game_result(&self, result: GameResult) -> StoreResult<GameResult> {
        self.write()?;
        self.inner.insert_game_result(result).await
    }

    async fn list_game_results(&self, tenant: TenantId, profile: ProfileId) -> StoreResult<Vec<GameResult>> {
        self.read()?;
        self.inner.list_game_results(tenant, profile).await
    }

    async fn delete_telemetry_for_profile(&self, tenant: TenantId, profile: ProfileId) -> StoreResult<usize> {
        self.cleanup()?;
        self.inner.delete_telemetry_for_profile(tenant, profile).await
    }

    async fn insert_admin(&self, account: AdminAccount, secret: SecretHash) -> StoreResult<AdminAccount> {
        self.write()?;
        self.inner.insert_admin(account, secret).await
    }

    async fn find_admin_by_email(&self, email: &str) -> StoreResult<Option<(AdminAccount, SecretHash)>> {
        self.read()?;
        self.inner.find_admin_by_email(email).await
    }

    async fn get_admin(&self, id: SubjectId) -> StoreResult<AdminAccount> {
        self.read()?;
        self.inner.get_admin(id).await
    }

    async fn set_admin_active(&self, id: SubjectId, active: bool) -> StoreResult<AdminAccount> {
        self.write()?;
        self.inner.set_admin_active(id, active).await
    }

    async fn list_admins(&self) -> StoreResult<Vec<AdminAccount>> {
        self.read()?;
        self.inner.list_admins().await
    }
}

#[async_trait]
impl SubjectRegistry for FlakyStore {
    async fn is_subject_active(&self, role: Role, subject: SubjectId) -> anyhow::Result<bool> {
        self.inner.is_subject_active(role, subject).await
    }
}

/// Request body for a profile whose contact is derived from its code
pub fn new_profile(login_code: &str) -> NewProfile {
    new_profile_with_contact(login_code, &format!("+1555{login_code}"))
}

pub fn new_profile_with_contact(login_code: &str, contact: &str) -> NewProfile {
    NewProfile {
        display_name: format!("Child {login_code}"),
        contact: contact.to_string(),
        login_code: login_code.to_string(),
        secret: CHILD_SECRET.to_string(),
    }
}

/// Server over a `FlakyStore` with a logged-in super-administrator
pub struct TestWorld {
    pub server: Arc<SyncServer>,
    pub store: Arc<FlakyStore>,
    pub super_ctx: SessionContext,
    admins: AtomicUsize,
}

impl TestWorld {
    pub async fn new() -> Self {
        Self::with_config(SyncConfig::new()).await
    }

    pub async fn with_config(config: SyncConfig) -> Self {
        let store = Arc::new(FlakyStore::new());
        let server = Arc::new(SyncServer::new(store.clone(), config).unwrap());

        server
            .bootstrap_super_admin("Root", SUPER_EMAIL, PASSWORD)
            .await
            .unwrap();
        let login = server.login_super_admin(SUPER_EMAIL, PASSWORD).await.unwrap();

        Self {
            server,
            store,
            super_ctx: SessionContext::new(login.token),
            admins: AtomicUsize::new(0),
        }
    }

    /// Register and log in an administrator; `None` mints a new tenant
    pub async fn admin(&self, tenant: Option<TenantId>) -> (AdminAccount, SessionContext) {
        let n = self.admins.fetch_add(1, Ordering::SeqCst);
        let email = format!("admin{n}@kinsync.test");
        let account = self
            .server
            .register_admin(&self.super_ctx, &format!("Admin {n}"), &email, PASSWORD, tenant)
            .await
            .unwrap();
        let login = self.server.login_admin(&email, PASSWORD).await.unwrap();
        (account, SessionContext::new(login.token))
    }

    /// Another session for an already-registered administrator
    pub async fn admin_session(&self, account: &AdminAccount) -> SessionContext {
        let login = self.server.login_admin(&account.email, PASSWORD).await.unwrap();
        SessionContext::new(login.token)
    }

    pub async fn profile(&self, ctx: &SessionContext, login_code: &str) -> ManagedProfile {
        self.server
            .create_profile(ctx, new_profile(login_code))
            .await
            .unwrap()
    }

    pub async fn child_session(&self, login_code: &str) -> SessionContext {
        let login = self.server.login_child(login_code, CHILD_SECRET).await.unwrap();
        SessionContext::new(login.token)
    }
}
