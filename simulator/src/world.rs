//! In-process deployment the simulator drives: one server, several tenants,
//! several live administrator sessions per tenant

use crate::report::{InvariantCheck, Violation};
use anyhow::{Context, Result};
use futures::future::join_all;
use kinsync_client::{canonical, ReconciliationMachine, SessionHandle, SyncState};
use kinsync_core::{SessionContext, SyncConfig, SyncServer};
use kinsync_model::{NewProfile, ProfileId, TenantId, TenantSnapshot};
use kinsync_store::MemoryStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub(crate) const PASSWORD: &str = "simulated-password";
pub(crate) const CHILD_SECRET: &str = "simulated-secret";
const OPERATOR_EMAIL: &str = "operator@kinsync.sim";

/// Profile as the simulator believes it exists
#[derive(Debug, Clone)]
pub(crate) struct TrackedProfile {
    pub(crate) id: ProfileId,
    pub(crate) login_code: String,
    pub(crate) active: bool,
}

pub(crate) struct SimSession {
    pub(crate) ctx: SessionContext,
    pub(crate) handle: SessionHandle,
}

pub(crate) struct SimTenant {
    pub(crate) id: TenantId,
    pub(crate) sessions: Vec<SimSession>,
    pub(crate) profiles: Vec<TrackedProfile>,
}

impl SimTenant {
    pub(crate) fn writer(&self, index: usize) -> &SessionContext {
        &self.sessions[index % self.sessions.len()].ctx
    }
}

/// Store-wide unique login codes, shareable across writer tasks
#[derive(Debug, Clone, Default)]
pub(crate) struct LoginCodes(Arc<AtomicU32>);

impl LoginCodes {
    pub(crate) fn next(&self) -> String {
        let n = self.0.fetch_add(1, Ordering::Relaxed);
        format!("{:06}", 100_000 + n % 900_000)
    }
}

pub(crate) struct SimWorld {
    pub(crate) server: Arc<SyncServer>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) tenants: Vec<SimTenant>,
    pub(crate) codes: LoginCodes,
}

impl SimWorld {
    /// Seed the operator, `tenants` tenants with `sessions` administrators
    /// each, and bring every administrator's session live
    pub(crate) async fn build(config: &SyncConfig, tenants: usize, sessions: usize) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let server = Arc::new(SyncServer::new(Arc::clone(&store), config.clone())?);

        server
            .bootstrap_super_admin("Operator", OPERATOR_EMAIL, PASSWORD)
            .await
            .context("seeding the operator")?;
        let operator = server.login_super_admin(OPERATOR_EMAIL, PASSWORD).await?;
        let operator = SessionContext::new(operator.token);

        let mut seeded = Vec::with_capacity(tenants);
        for t in 0..tenants {
            let mut tenant_id = None;
            let mut members = Vec::with_capacity(sessions);

            for s in 0..sessions.max(1) {
                let email = format!("admin-{t}-{s}@kinsync.sim");
                let account = server
                    .register_admin(&operator, &format!("Admin {t}.{s}"), &email, PASSWORD, tenant_id)
                    .await
                    .with_context(|| format!("registering {email}"))?;
                tenant_id = account.tenant_id;

                let login = server.login_admin(&email, PASSWORD).await?;
                let ctx = SessionContext::new(login.token);
                let handle = ReconciliationMachine::connect(Arc::clone(&server), ctx.clone(), config.clone()).await?;
                timeout(config.bootstrap_timeout() * 2, handle.wait_for_state(SyncState::Live))
                    .await
                    .with_context(|| format!("session of {email} never went live"))??;
                members.push(SimSession { ctx, handle });
            }

            let id = tenant_id.context("administrator registered without a tenant")?;
            tracing::debug!(tenant = %id, sessions = members.len(), "tenant seeded");
            seeded.push(SimTenant {
                id,
                sessions: members,
                profiles: Vec::new(),
            });
        }

        Ok(Self {
            server,
            store,
            tenants: seeded,
            codes: LoginCodes::default(),
        })
    }

    pub(crate) fn new_profile(login_code: &str) -> NewProfile {
        NewProfile {
            display_name: format!("Child {login_code}"),
            contact: format!("+1555{login_code}"),
            login_code: login_code.to_string(),
            secret: CHILD_SECRET.to_string(),
        }
    }

    pub(crate) fn session_count(&self) -> usize {
        self.tenants.iter().map(|t| t.sessions.len()).sum()
    }

    /// Canonical snapshot of every tenant, read through the endpoints
    pub(crate) async fn fingerprint(&self) -> Result<Vec<TenantSnapshot>> {
        let mut snapshots = Vec::with_capacity(self.tenants.len());
        for tenant in &self.tenants {
            let snapshot = self.server.fetch_snapshot(tenant.writer(0)).await?;
            snapshots.push(canonical(snapshot));
        }
        Ok(snapshots)
    }

    /// Views holding anything outside their own tenant
    pub(crate) fn foreign_records(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        for tenant in &self.tenants {
            for session in &tenant.sessions {
                let foreign = session.handle.with_view(|view| {
                    view.tenant_id() != tenant.id
                        || view.profiles().iter().any(|p| p.tenant_id != tenant.id)
                        || view.notes().iter().any(|n| n.tenant_id != tenant.id)
                        || view.emotions().iter().any(|e| e.tenant_id != tenant.id)
                        || view.games().iter().any(|g| g.tenant_id != tenant.id)
                });
                if foreign {
                    violations.push(Violation::invariant(
                        InvariantCheck::NoForeignRecords,
                        format!("session {} of tenant {}", session.ctx.session_id, tenant.id),
                    ));
                }
            }
        }
        violations
    }

    /// Wait for every live view to equal a fresh snapshot of its tenant
    pub(crate) async fn converge(&self, wait: Duration) -> Vec<Violation> {
        let checks = self.tenants.iter().flat_map(|tenant| {
            tenant.sessions.iter().map(move |session| async move {
                let truth = match self.server.fetch_snapshot(&session.ctx).await {
                    Ok(truth) => truth,
                    Err(err) => {
                        return Some(Violation::invariant(
                            InvariantCheck::ViewMatchesSnapshot,
                            format!("snapshot for tenant {} failed: {err}", tenant.id),
                        ))
                    }
                };
                match timeout(wait, session.handle.wait_for_view(|v| v.matches(&truth))).await {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(Violation::invariant(
                        InvariantCheck::SessionStayedOpen,
                        format!("session {}: {err}", session.ctx.session_id),
                    )),
                    Err(_) => Some(Violation::invariant(
                        InvariantCheck::ViewMatchesSnapshot,
                        format!(
                            "session {} of tenant {} still differs after {wait:?} ({})",
                            session.ctx.session_id,
                            tenant.id,
                            session.handle.state()
                        ),
                    )),
                }
            })
        });

        join_all(checks).await.into_iter().flatten().collect()
    }

    pub(crate) fn orphans(&self) -> Option<Violation> {
        let orphans = self.store.orphan_count();
        (orphans > 0).then(|| {
            Violation::invariant(
                InvariantCheck::NoOrphanRecords,
                format!("{orphans} records outlive their profile"),
            )
        })
    }

    pub(crate) async fn shutdown(self) {
        for tenant in self.tenants {
            for mut session in tenant.sessions {
                session.handle.close().await;
            }
        }
    }
}
