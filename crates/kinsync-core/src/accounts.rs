//! Logins and administrator accounts
//!
//! Failed logins share one message regardless of cause (unknown account,
//! wrong secret, inactive account) except a child whose profile was
//! deactivated, which is told so after presenting the correct secret.

use crate::context::SessionContext;
use crate::error::SyncError;
use crate::server::SyncServer;
use chrono::Utc;
use kinsync_auth::{Credential, IssuedCredential, SecretHash};
use kinsync_model::validation::{email, required_text};
use kinsync_model::{AdminAccount, LoginCode, Role, SubjectId, TenantId};

const MAX_NAME_LEN: usize = 100;
const MAX_PASSWORD_LEN: usize = 128;
const BAD_LOGIN: &str = "invalid login credentials";

impl SyncServer {
    /// Seed the first super-administrator
    ///
    /// Needs no credential; intended for process start-up.
    ///
    /// # Errors
    /// `Validation` on malformed input, `Conflict` when the email exists
    pub async fn bootstrap_super_admin(
        &self,
        name: &str,
        email_address: &str,
        password: &str,
    ) -> Result<AdminAccount, SyncError> {
        let outcome = self
            .create_account(Role::SuperAdmin, None, name, email_address, password)
            .await;
        self.finish("bootstrap_super_admin", outcome)
    }

    /// Register a tenant administrator
    ///
    /// Super-administrator only. `tenant: None` mints a new tenant; passing an
    /// existing one lets several administrators share it.
    ///
    /// # Errors
    /// `Forbidden` for other roles, `Conflict` when the email exists
    pub async fn register_admin(
        &self,
        ctx: &SessionContext,
        name: &str,
        email_address: &str,
        password: &str,
        tenant: Option<TenantId>,
    ) -> Result<AdminAccount, SyncError> {
        let outcome: Result<_, SyncError> = async {
            self.authorize(ctx, &[Role::SuperAdmin]).await?;
            let tenant = tenant.unwrap_or_default();
            self.create_account(Role::Admin, Some(tenant), name, email_address, password)
                .await
        }
        .await;
        self.finish("register_admin", outcome)
    }

    /// Activate or deactivate an administrator
    ///
    /// Credentials already issued to a deactivated administrator stop
    /// verifying on their next use.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `Forbidden` when targeting a
    /// super-administrator
    pub async fn set_admin_active(
        &self,
        ctx: &SessionContext,
        admin_id: SubjectId,
        active: bool,
    ) -> Result<AdminAccount, SyncError> {
        let outcome: Result<_, SyncError> = async {
            self.authorize(ctx, &[Role::SuperAdmin]).await?;
            let account = self.store.get_admin(admin_id).await?;
            if account.role != Role::Admin {
                return Err(SyncError::Forbidden);
            }
            let account = self.store.set_admin_active(admin_id, active).await?;
            tracing::info!(admin = %admin_id, active, "administrator status changed");
            Ok(account)
        }
        .await;
        self.finish("set_admin_active", outcome)
    }

    /// Every tenant administrator, oldest first
    ///
    /// # Errors
    /// `Forbidden` for other roles
    pub async fn list_admins(&self, ctx: &SessionContext) -> Result<Vec<AdminAccount>, SyncError> {
        let outcome: Result<_, SyncError> = async {
            self.authorize(ctx, &[Role::SuperAdmin]).await?;
            let accounts = self.store.list_admins().await?;
            Ok(accounts
                .into_iter()
                .filter(|account| account.role == Role::Admin)
                .collect())
        }
        .await;
        self.finish("list_admins", outcome)
    }

    /// Administrator login
    ///
    /// # Errors
    /// `Unauthorized` for unknown, inactive or mismatching accounts
    pub async fn login_admin(&self, email_address: &str, password: &str) -> Result<IssuedCredential, SyncError> {
        let outcome = self.login_account(Role::Admin, email_address, password).await;
        self.finish("login_admin", outcome)
    }

    /// Super-administrator login
    ///
    /// # Errors
    /// `Unauthorized` for unknown, inactive or mismatching accounts
    pub async fn login_super_admin(
        &self,
        email_address: &str,
        password: &str,
    ) -> Result<IssuedCredential, SyncError> {
        let outcome = self.login_account(Role::SuperAdmin, email_address, password).await;
        self.finish("login_super_admin", outcome)
    }

    /// Child login with the profile's login code and secret
    ///
    /// The issued credential is bound to the profile's tenant.
    ///
    /// # Errors
    /// `Validation` for a malformed code, `Unauthorized` for a wrong secret or
    /// a deactivated profile
    pub async fn login_child(&self, login_code: &str, secret: &str) -> Result<IssuedCredential, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let code = LoginCode::parse(login_code)?;
            let Some((profile, hash)) = self.store.find_login(&code).await? else {
                return Err(SyncError::Unauthorized(BAD_LOGIN.to_string()));
            };
            if !hash.matches(secret) {
                return Err(SyncError::Unauthorized(BAD_LOGIN.to_string()));
            }
            if !profile.active {
                return Err(SyncError::Unauthorized("account deactivated".to_string()));
            }

            let issued = self.authority.issue(
                Role::Child,
                profile.id.into(),
                Some(profile.tenant_id),
                &profile.display_name,
            )?;
            tracing::info!(tenant = %profile.tenant_id, profile = %profile.id, "child logged in");
            Ok(issued)
        }
        .await;
        self.finish("login_child", outcome)
    }

    /// Verified credential of the session
    ///
    /// # Errors
    /// `Unauthorized` or `Expired`
    pub async fn verify_session(&self, ctx: &SessionContext) -> Result<Credential, SyncError> {
        let outcome = self.authority.verify(&ctx.token).await.map_err(SyncError::from);
        self.finish("verify_session", outcome)
    }

    async fn create_account(
        &self,
        role: Role,
        tenant: Option<TenantId>,
        name: &str,
        email_address: &str,
        password: &str,
    ) -> Result<AdminAccount, SyncError> {
        let account = AdminAccount {
            id: SubjectId::new(),
            role,
            tenant_id: tenant,
            name: required_text("name", name, MAX_NAME_LEN)?,
            email: email(email_address)?,
            active: true,
            created_at: Utc::now(),
        };
        let password = required_text("password", password, MAX_PASSWORD_LEN)?;

        let account = self
            .store
            .insert_admin(account, SecretHash::derive(&password))
            .await?;
        tracing::info!(admin = %account.id, %role, tenant = ?account.tenant_id, "account created");
        Ok(account)
    }

    async fn login_account(
        &self,
        role: Role,
        email_address: &str,
        password: &str,
    ) -> Result<IssuedCredential, SyncError> {
        let rejected = || SyncError::Unauthorized(BAD_LOGIN.to_string());

        let Ok(address) = email(email_address) else {
            return Err(rejected());
        };
        let Some((account, hash)) = self.store.find_admin_by_email(&address).await? else {
            return Err(rejected());
        };
        if account.role != role || !account.active || !hash.matches(password) {
            return Err(rejected());
        }

        let issued = self
            .authority
            .issue(role, account.id, account.tenant_id, &account.name)?;
        tracing::info!(admin = %account.id, %role, "administrator logged in");
        Ok(issued)
    }
}
