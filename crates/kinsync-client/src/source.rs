//! Server-side operations a reconciling session depends on

use async_trait::async_trait;
use kinsync_bus::Subscription;
use kinsync_core::{SessionContext, SyncError, SyncServer};
use kinsync_model::{Role, TenantId, TenantSnapshot};

/// What a session needs from the server: its tenant, a live event channel,
/// and an authoritative snapshot
#[async_trait]
pub trait SyncSource: Send + Sync {
    /// Tenant of an administrator session
    async fn session_tenant(&self, ctx: &SessionContext) -> Result<TenantId, SyncError>;

    /// Open (or replace) the session's event channel
    async fn open_event_channel(&self, ctx: &SessionContext) -> Result<Subscription, SyncError>;

    /// Full authorized state of the session's tenant
    async fn fetch_snapshot(&self, ctx: &SessionContext) -> Result<TenantSnapshot, SyncError>;
}

#[async_trait]
impl SyncSource for SyncServer {
    async fn session_tenant(&self, ctx: &SessionContext) -> Result<TenantId, SyncError> {
        let credential = self.verify_session(ctx).await?;
        if credential.role != Role::Admin {
            return Err(SyncError::Forbidden);
        }
        credential
            .tenant_id
            .ok_or_else(|| SyncError::Unauthorized("credential carries no tenant".to_string()))
    }

    async fn open_event_channel(&self, ctx: &SessionContext) -> Result<Subscription, SyncError> {
        SyncServer::open_event_channel(self, ctx).await
    }

    async fn fetch_snapshot(&self, ctx: &SessionContext) -> Result<TenantSnapshot, SyncError> {
        SyncServer::fetch_snapshot(self, ctx).await
    }
}
