//! Concurrent writers against one server
//!
//! Every administrator session writes from its own task, so tenants and the
//! writers inside a tenant race each other on a multi-thread runtime. Writers
//! create, annotate and delete their own profiles, and rename or toggle any
//! profile of their tenant, so several sessions contend on the same profile.
//! The only tolerated rejection is `NotFound` on a profile its owner deleted
//! concurrently; anything else is a violation.

use crate::report::{ExpectedResult, StressReport, Violation};
use crate::world::{LoginCodes, SimWorld};
use anyhow::{ensure, Result};
use kinsync_core::{SessionContext, SyncConfig, SyncError, SyncServer};
use kinsync_model::{NewNote, ProfileChanges, ProfileId};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub seed: u64,
    pub tenants: usize,
    pub sessions_per_tenant: usize,
    /// Operations across all writers
    pub total_operations: u64,
    pub settle_timeout: Duration,
    pub sync: SyncConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seed: 12_345,
            tenants: 4,
            sessions_per_tenant: 4,
            total_operations: 5_000,
            settle_timeout: Duration::from_secs(30),
            sync: SyncConfig::new(),
        }
    }
}

/// Live profiles of one tenant, visible to all of its writers
type TenantPool = Arc<Mutex<Vec<ProfileId>>>;

struct Writer {
    server: Arc<SyncServer>,
    ctx: SessionContext,
    codes: LoginCodes,
    rng: StdRng,
    own: Vec<ProfileId>,
    pool: TenantPool,
}

impl Writer {
    async fn step(&mut self) -> Result<&'static str, (&'static str, SyncError)> {
        let roll: f64 = self.rng.gen();
        if self.own.is_empty() || roll < 0.25 {
            let code = self.codes.next();
            let profile = self
                .server
                .create_profile(&self.ctx, SimWorld::new_profile(&code))
                .await
                .map_err(|e| ("create_profile", e))?;
            self.own.push(profile.id);
            self.pool.lock().push(profile.id);
            return Ok("create_profile");
        }

        if (0.6..0.85).contains(&roll) {
            return self.contend(roll).await;
        }

        let index = self.rng.gen_range(0..self.own.len());
        let profile = self.own[index];
        if roll < 0.45 {
            let input = NewNote {
                text: format!("stress note {roll:.4}"),
            };
            self.server
                .add_note(&self.ctx, profile, input)
                .await
                .map_err(|e| ("add_note", e))?;
            Ok("add_note")
        } else if roll < 0.6 {
            self.server
                .update_profile(&self.ctx, profile, renamed(roll))
                .await
                .map_err(|e| ("update_profile", e))?;
            Ok("update_profile")
        } else {
            self.own.swap_remove(index);
            self.pool.lock().retain(|id| *id != profile);
            self.server
                .delete_profile(&self.ctx, profile)
                .await
                .map_err(|e| ("delete_profile", e))?;
            Ok("delete_profile")
        }
    }

    /// Rename or toggle a profile any writer of the tenant may be touching
    async fn contend(&mut self, roll: f64) -> Result<&'static str, (&'static str, SyncError)> {
        let target = {
            let pool = self.pool.lock();
            if pool.is_empty() {
                None
            } else {
                Some(pool[self.rng.gen_range(0..pool.len())])
            }
        };
        let Some(profile) = target else {
            return Ok("contend_skipped");
        };

        let (kind, outcome) = if roll < 0.75 {
            let outcome = self
                .server
                .update_profile(&self.ctx, profile, renamed(roll))
                .await
                .map(|_| ());
            ("update_shared_profile", outcome)
        } else {
            let active = self.rng.gen_bool(0.5);
            let outcome = self
                .server
                .set_profile_active(&self.ctx, profile, active)
                .await
                .map(|_| ());
            ("toggle_shared_profile", outcome)
        };

        match outcome {
            Ok(()) => Ok(kind),
            Err(SyncError::NotFound) => Ok("shared_profile_gone"),
            Err(err) => Err((kind, err)),
        }
    }

    async fn run(mut self, operations: u64) -> (u64, Vec<Violation>) {
        let mut committed = 0;
        let mut violations = Vec::new();
        for i in 0..operations {
            match self.step().await {
                Ok(_) => committed += 1,
                Err((kind, err)) => violations.push(Violation::UnexpectedOutcome {
                    operation_index: i,
                    operation: format!("{kind} by session {}", self.ctx.session_id),
                    expected: ExpectedResult::ShouldSucceed,
                    actual: Err(err.to_string()),
                }),
            }
        }
        (committed, violations)
    }
}

fn renamed(roll: f64) -> ProfileChanges {
    ProfileChanges {
        display_name: Some(format!("Renamed {roll:.4}")),
        ..ProfileChanges::default()
    }
}

/// Race all writers, then check convergence, tenancy and orphans
///
/// # Errors
/// When the deployment cannot be set up or a writer task panics
pub async fn run_stress(config: StressConfig) -> Result<StressReport> {
    ensure!(config.tenants > 0, "at least one tenant is required");
    let world = SimWorld::build(&config.sync, config.tenants, config.sessions_per_tenant).await?;
    let writers = world.session_count();
    let per_writer = config.total_operations / writers as u64;
    let remainder = config.total_operations % writers as u64;

    tracing::info!(
        tenants = config.tenants,
        writers,
        operations = config.total_operations,
        "stress run started"
    );

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    let sessions = world.tenants.iter().flat_map(|t| {
        let pool = TenantPool::default();
        t.sessions.iter().map(move |s| (s, Arc::clone(&pool)))
    });
    for (n, (session, pool)) in sessions.enumerate() {
        let writer = Writer {
            server: Arc::clone(&world.server),
            ctx: session.ctx.clone(),
            codes: world.codes.clone(),
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(n as u64)),
            own: Vec::new(),
            pool,
        };
        let operations = per_writer + u64::from((n as u64) < remainder);
        tasks.spawn(writer.run(operations));
    }

    let mut operations = 0;
    let mut violations = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (committed, found) = joined?;
        operations += committed;
        violations.extend(found);
    }
    let elapsed = started.elapsed();

    violations.extend(world.converge(config.settle_timeout).await);
    violations.extend(world.foreign_records());
    violations.extend(world.orphans());
    world.shutdown().await;

    Ok(StressReport {
        tenants: config.tenants,
        sessions: writers,
        operations,
        elapsed,
        violations,
    })
}
