//! In-memory store engine
//!
//! One `RwLock` over all tables so uniqueness checks and their index updates
//! happen under a single write guard. The lock is never held across `.await`.
//!
//! Profile revisions are stamped under the same guard: 1 on insert, +1 on
//! every update or status change.

use crate::error::{StoreError, StoreResult};
use crate::traits::TenantStore;
use async_trait::async_trait;
use kinsync_auth::{SecretHash, SubjectRegistry};
use kinsync_model::{
    AdminAccount, EmotionSample, GameResult, LoginCode, ManagedProfile, Note, ProfileId,
    ProfilePatch, Role, SubjectId, TenantId,
};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct StoredProfile {
    profile: ManagedProfile,
    secret: SecretHash,
}

#[derive(Debug, Clone)]
struct StoredAdmin {
    account: AdminAccount,
    secret: SecretHash,
}

#[derive(Debug, Default)]
struct Tables {
    profiles: HashMap<ProfileId, StoredProfile>,
    login_codes: HashMap<LoginCode, ProfileId>,
    contacts: HashMap<String, ProfileId>,
    notes: HashMap<ProfileId, Vec<Note>>,
    emotions: HashMap<ProfileId, Vec<EmotionSample>>,
    games: HashMap<ProfileId, Vec<GameResult>>,
    admins: HashMap<SubjectId, StoredAdmin>,
    admin_emails: HashMap<String, SubjectId>,
}

impl Tables {
    fn owned(&self, tenant: TenantId, id: ProfileId) -> StoreResult<&StoredProfile> {
        self.profiles
            .get(&id)
            .filter(|stored| stored.profile.tenant_id == tenant)
            .ok_or(StoreError::NotFound)
    }

    fn owned_mut(&mut self, tenant: TenantId, id: ProfileId) -> StoreResult<&mut StoredProfile> {
        self.profiles
            .get_mut(&id)
            .filter(|stored| stored.profile.tenant_id == tenant)
            .ok_or(StoreError::NotFound)
    }

    fn check_unique(
        &self,
        login_code: Option<&LoginCode>,
        contact: Option<&str>,
        except: Option<ProfileId>,
    ) -> StoreResult<()> {
        let taken_by_other = |holder: Option<&ProfileId>| holder.is_some_and(|id| Some(*id) != except);

        if login_code.is_some_and(|code| taken_by_other(self.login_codes.get(code))) {
            return Err(StoreError::Conflict("login code"));
        }
        if contact.is_some_and(|contact| taken_by_other(self.contacts.get(contact))) {
            return Err(StoreError::Conflict("contact"));
        }
        Ok(())
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dependent records whose profile no longer exists
    #[must_use]
    pub fn orphan_count(&self) -> usize {
        let tables = self.tables.read();
        let orphaned = |profile: &ProfileId| !tables.profiles.contains_key(profile);

        let notes: usize = tables
            .notes
            .iter()
            .filter(|(p, _)| orphaned(*p))
            .map(|(_, v)| v.len())
            .sum();
        let emotions: usize = tables
            .emotions
            .iter()
            .filter(|(p, _)| orphaned(*p))
            .map(|(_, v)| v.len())
            .sum();
        let games: usize = tables
            .games
            .iter()
            .filter(|(p, _)| orphaned(*p))
            .map(|(_, v)| v.len())
            .sum();

        notes + emotions + games
    }

    /// Number of stored profiles across all tenants
    #[must_use]
    pub fn profile_count(&self) -> usize {
        self.tables.read().profiles.len()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn insert_profile(
        &self,
        mut profile: ManagedProfile,
        secret: SecretHash,
    ) -> StoreResult<ManagedProfile> {
        profile.revision = 1;
        let mut tables = self.tables.write();
        if let Err(e) = tables.check_unique(Some(&profile.login_code), Some(&profile.contact), None) {
            tracing::debug!(tenant = %profile.tenant_id, error = %e, "profile insert rejected");
            return Err(e);
        }

        tables.login_codes.insert(profile.login_code.clone(), profile.id);
        tables.contacts.insert(profile.contact.clone(), profile.id);
        tables.profiles.insert(
            profile.id,
            StoredProfile {
                profile: profile.clone(),
                secret,
            },
        );
        Ok(profile)
    }

    async fn get_profile(&self, tenant: TenantId, id: ProfileId) -> StoreResult<ManagedProfile> {
        let tables = self.tables.read();
        Ok(tables.owned(tenant, id)?.profile.clone())
    }

    async fn list_profiles(&self, tenant: TenantId) -> StoreResult<Vec<ManagedProfile>> {
        let tables = self.tables.read();
        let mut profiles: Vec<ManagedProfile> = tables
            .profiles
            .values()
            .filter(|stored| stored.profile.tenant_id == tenant)
            .map(|stored| stored.profile.clone())
            .collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(profiles)
    }

    async fn update_profile(
        &self,
        tenant: TenantId,
        id: ProfileId,
        patch: ProfilePatch,
    ) -> StoreResult<ManagedProfile> {
        let mut tables = self.tables.write();
        tables.owned(tenant, id)?;
        tables.check_unique(patch.login_code.as_ref(), patch.contact.as_deref(), Some(id))?;

        let stored = tables.owned_mut(tenant, id)?;
        let old_code = stored.profile.login_code.clone();
        let old_contact = stored.profile.contact.clone();

        if let Some(name) = patch.display_name {
            stored.profile.display_name = name;
        }
        if let Some(contact) = patch.contact {
            stored.profile.contact = contact;
        }
        if let Some(code) = patch.login_code {
            stored.profile.login_code = code;
        }
        stored.profile.revision += 1;
        let updated = stored.profile.clone();

        if updated.login_code != old_code {
            tables.login_codes.remove(&old_code);
            tables.login_codes.insert(updated.login_code.clone(), id);
        }
        if updated.contact != old_contact {
            tables.contacts.remove(&old_contact);
            tables.contacts.insert(updated.contact.clone(), id);
        }
        Ok(updated)
    }

    async fn set_profile_active(
        &self,
        tenant: TenantId,
        id: ProfileId,
        active: bool,
    ) -> StoreResult<ManagedProfile> {
        let mut tables = self.tables.write();
        let stored = tables.owned_mut(tenant, id)?;
        stored.profile.active = active;
        stored.profile.revision += 1;
        Ok(stored.profile.clone())
    }

    async fn set_profile_secret(
        &self,
        tenant: TenantId,
        id: ProfileId,
        secret: SecretHash,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables.owned_mut(tenant, id)?.secret = secret;
        Ok(())
    }

    async fn delete_profile(&self, tenant: TenantId, id: ProfileId) -> StoreResult<ManagedProfile> {
        let mut tables = self.tables.write();
        tables.owned(tenant, id)?;

        let stored = tables.profiles.remove(&id).ok_or(StoreError::NotFound)?;
        tables.login_codes.remove(&stored.profile.login_code);
        tables.contacts.remove(&stored.profile.contact);
        Ok(stored.profile)
    }

    async fn find_login(&self, code: &LoginCode) -> StoreResult<Option<(ManagedProfile, SecretHash)>> {
        let tables = self.tables.read();
        Ok(tables
            .login_codes
            .get(code)
            .and_then(|id| tables.profiles.get(id))
            .map(|stored| (stored.profile.clone(), stored.secret.clone())))
    }

    async fn insert_note(&self, note: Note) -> StoreResult<Note> {
        let mut tables = self.tables.write();
        tables.owned(note.tenant_id, note.profile_id)?;
        tables.notes.entry(note.profile_id).or_default().push(note.clone());
        Ok(note)
    }

    async fn list_notes(&self, tenant: TenantId, profile: ProfileId) -> StoreResult<Vec<Note>> {
        let tables = self.tables.read();
        tables.owned(tenant, profile)?;

        let mut notes: Vec<Note> = tables
            .notes
            .get(&profile)
            .map(|notes| {
                notes
                    .iter()
                    .filter(|n| n.tenant_id == tenant)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(notes)
    }

    async fn delete_notes_for_profile(
        &self,
        tenant: TenantId,
        profile: ProfileId,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let Some(notes) = tables.notes.get_mut(&profile) else {
            return Ok(0);
        };
        let before = notes.len();
        notes.retain(|n| n.tenant_id != tenant);
        let removed = before - notes.len();
        if notes.is_empty() {
            tables.notes.remove(&profile);
        }
        Ok(removed)
    }

    async fn insert_emotion(&self, sample: EmotionSample) -> StoreResult<EmotionSample> {
        let mut tables = self.tables.write();
        tables.owned(sample.tenant_id, sample.profile_id)?;
        tables
            .emotions
            .entry(sample.profile_id)
            .or_default()
            .push(sample.clone());
        Ok(sample)
    }

    async fn list_emotions(
        &self,
        tenant: TenantId,
        profile: ProfileId,
    ) -> StoreResult<Vec<EmotionSample>> {
        let tables = self.tables.read();
        tables.owned(tenant, profile)?;

        let mut samples = tables.emotions.get(&profile).cloned().unwrap_or_default();
        samples.sort_by(|a, b| a.observed_at.cmp(&b.observed_at));
        Ok(samples)
    }

    async fn insert_game_result(&self, result: GameResult) -> StoreResult<GameResult> {
        let mut tables = self.tables.write();
        tables.owned(result.tenant_id, result.profile_id)?;
        tables
            .games
            .entry(result.profile_id)
            .or_default()
            .push(result.clone());
        Ok(result)
    }

    async fn list_game_results(
        &self,
        tenant: TenantId,
        profile: ProfileId,
    ) -> StoreResult<Vec<GameResult>> {
        let tables = self.tables.read();
        tables.owned(tenant, profile)?;

        let mut results = tables.games.get(&profile).cloned().unwrap_or_default();
        results.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));
        Ok(results)
    }

    async fn delete_telemetry_for_profile(
        &self,
        tenant: TenantId,
        profile: ProfileId,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let mut removed = 0;

        if let Some(samples) = tables.emotions.get_mut(&profile) {
            let before = samples.len();
            samples.retain(|s| s.tenant_id != tenant);
            removed += before - samples.len();
            if samples.is_empty() {
                tables.emotions.remove(&profile);
            }
        }
        if let Some(results) = tables.games.get_mut(&profile) {
            let before = results.len();
            results.retain(|r| r.tenant_id != tenant);
            removed += before - results.len();
            if results.is_empty() {
                tables.games.remove(&profile);
            }
        }
        Ok(removed)
    }

    async fn insert_admin(
        &self,
        account: AdminAccount,
        secret: SecretHash,
    ) -> StoreResult<AdminAccount> {
        let mut tables = self.tables.write();
        if tables.admin_emails.contains_key(&account.email) {
            return Err(StoreError::Conflict("email"));
        }
        tables.admin_emails.insert(account.email.clone(), account.id);
        tables.admins.insert(
            account.id,
            StoredAdmin {
                account: account.clone(),
                secret,
            },
        );
        Ok(account)
    }

    async fn find_admin_by_email(
        &self,
        email: &str,
    ) -> StoreResult<Option<(AdminAccount, SecretHash)>> {
        let tables = self.tables.read();
        Ok(tables
            .admin_emails
            .get(email)
            .and_then(|id| tables.admins.get(id))
            .map(|stored| (stored.account.clone(), stored.secret.clone())))
    }

    async fn get_admin(&self, id: SubjectId) -> StoreResult<AdminAccount> {
        let tables = self.tables.read();
        tables
            .admins
            .get(&id)
            .map(|stored| stored.account.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn set_admin_active(&self, id: SubjectId, active: bool) -> StoreResult<AdminAccount> {
        let mut tables = self.tables.write();
        let stored = tables.admins.get_mut(&id).ok_or(StoreError::NotFound)?;
        stored.account.active = active;
        Ok(stored.account.clone())
    }

    async fn list_admins(&self) -> StoreResult<Vec<AdminAccount>> {
        let tables = self.tables.read();
        let mut accounts: Vec<AdminAccount> =
            tables.admins.values().map(|s| s.account.clone()).collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }
}

#[async_trait]
impl SubjectRegistry for MemoryStore {
    async fn is_subject_active(&self, role: Role, subject: SubjectId) -> anyhow::Result<bool> {
        let tables = self.tables.read();
        let active = match role {
            Role::Admin | Role::SuperAdmin => tables
                .admins
                .get(&subject)
                .is_some_and(|stored| stored.account.active && stored.account.role == role),
            Role::Child => tables
                .profiles
                .get(&ProfileId::from(subject))
                .is_some_and(|stored| stored.profile.active),
        };
        Ok(active)
    }
}
