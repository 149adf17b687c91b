//! Server-side wiring of authority, store and bus
//!
//! Endpoint groups live in sibling modules as `impl SyncServer` blocks:
//! - [`crate::pipeline`]: writes (persist, then publish)
//! - [`crate::reads`]: tenant-filtered listings and the bootstrap snapshot
//! - [`crate::accounts`]: logins and administrator management

use crate::config::SyncConfig;
use crate::context::SessionContext;
use crate::error::{ConfigError, SyncError};
use kinsync_auth::{Credential, SessionAuthority, SubjectRegistry};
use kinsync_bus::{BroadcastBus, Subscription};
use kinsync_model::{DomainEvent, ProfileId, Role, TenantId};
use kinsync_store::TenantStore;
use std::sync::Arc;

/// The synchronization core as seen by collaborators
pub struct SyncServer {
    pub(crate) authority: SessionAuthority,
    pub(crate) store: Arc<dyn TenantStore>,
    pub(crate) bus: BroadcastBus,
    pub(crate) config: SyncConfig,
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("authority", &self.authority)
            .field("bus", &self.bus)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncServer {
    /// Build a server over `store` with a fresh bus
    ///
    /// The store also answers the authority's deactivation lookups.
    ///
    /// # Errors
    /// `ConfigError` when the configuration is invalid
    pub fn new<S>(store: Arc<S>, config: SyncConfig) -> Result<Self, ConfigError>
    where
        S: TenantStore + SubjectRegistry + 'static,
    {
        Self::with_bus(store, BroadcastBus::new(), config)
    }

    /// Build a server publishing on an existing bus
    ///
    /// # Errors
    /// `ConfigError` when the configuration is invalid
    pub fn with_bus<S>(store: Arc<S>, bus: BroadcastBus, config: SyncConfig) -> Result<Self, ConfigError>
    where
        S: TenantStore + SubjectRegistry + 'static,
    {
        config.validate()?;
        let registry: Arc<dyn SubjectRegistry> = store.clone();
        let store: Arc<dyn TenantStore> = store;
        let authority = SessionAuthority::new(config.signing_key()?, config.credential_ttl(), registry);

        Ok(Self {
            authority,
            store,
            bus,
            config,
        })
    }

    /// Bus this server publishes on
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Credential issuer and verifier
    #[inline]
    #[must_use]
    pub fn authority(&self) -> &SessionAuthority {
        &self.authority
    }

    /// Open the session's live event channel
    ///
    /// Admin only. The channel is bound to the tenant in the verified
    /// credential; a previous channel of the same session is closed.
    ///
    /// # Errors
    /// Authorization failures, see [`SyncError`]
    pub async fn open_event_channel(&self, ctx: &SessionContext) -> Result<Subscription, SyncError> {
        let outcome: Result<_, SyncError> = async {
            let credential = self.authorize(ctx, &[Role::Admin]).await?;
            let tenant = tenant_of(&credential)?;
            Ok(self.bus.subscribe(ctx.session_id, tenant))
        }
        .await;
        self.finish("open_event_channel", outcome)
    }

    /// Verify the session's credential and check its role
    pub(crate) async fn authorize(
        &self,
        ctx: &SessionContext,
        roles: &[Role],
    ) -> Result<Credential, SyncError> {
        let credential = self.authority.verify(&ctx.token).await?;
        if roles.contains(&credential.role) {
            Ok(credential)
        } else {
            Err(SyncError::Forbidden)
        }
    }

    /// Hand a committed event to the bus
    pub(crate) fn commit(&self, event: &DomainEvent) -> usize {
        let kind = event.kind();
        metrics::counter!("kinsync_pipeline_writes_total", "kind" => kind.as_str()).increment(1);

        let delivered = self.bus.publish(event);
        tracing::info!(
            tenant = %event.tenant_id,
            profile = %event.payload.profile_id(),
            %kind,
            delivered,
            "write committed"
        );
        delivered
    }

    /// Log and count a rejected call; pass the outcome through
    pub(crate) fn finish<T>(&self, op: &'static str, outcome: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(err) = &outcome {
            metrics::counter!("kinsync_pipeline_rejections_total", "reason" => err.label()).increment(1);
            tracing::warn!(op, reason = err.label(), error = %err, "request rejected");
        }
        outcome
    }
}

/// Tenant bound into a tenant-scoped credential
pub(crate) fn tenant_of(credential: &Credential) -> Result<TenantId, SyncError> {
    credential
        .tenant_id
        .ok_or_else(|| SyncError::Unauthorized("credential carries no tenant".to_string()))
}

/// Profile a Child credential speaks for
pub(crate) fn own_profile(credential: &Credential) -> ProfileId {
    ProfileId::from(credential.subject_id)
}
