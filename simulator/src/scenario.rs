//! Seeded sequential simulation
//!
//! Operations are generated from a seeded RNG and executed one at a time, so
//! every accept/reject decision is reproducible from the seed. Session
//! disconnects are injected between operations; their timing relative to the
//! background resyncs is not.

use crate::report::{ExpectedResult, InvariantCheck, OperationStats, SimulatorReport, Violation};
use crate::world::{SimWorld, TrackedProfile};
use anyhow::{ensure, Result};
use kinsync_core::{SessionContext, SyncConfig, SyncError};
use kinsync_model::{NewEmotionSample, NewGameResult, NewNote, ProfileChanges, ProfileId};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::{Duration, Instant};

const EMOTIONS: [&str; 4] = ["happy", "sad", "calm", "angry"];

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub total_operations: u64,
    pub tenants: usize,
    /// Administrators (each with one live session) per tenant
    pub sessions_per_tenant: usize,
    /// Chance of severing one random session after an operation
    pub disconnect_rate: f64,
    /// Share of operations generated to be rejected
    pub invalid_rate: f64,
    /// Converge and check views every this many operations
    pub checkpoint_interval: Option<u64>,
    /// How long views may take to settle at a checkpoint
    pub settle_timeout: Duration,
    pub stop_on_first_violation: bool,
    pub sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            total_operations: 1_000,
            tenants: 3,
            sessions_per_tenant: 2,
            disconnect_rate: 0.02,
            invalid_rate: 0.15,
            checkpoint_interval: Some(250),
            settle_timeout: Duration::from_secs(10),
            stop_on_first_violation: false,
            sync: SyncConfig::new(),
        }
    }
}

/// Everything the simulator can do to the server
#[derive(Debug, Clone)]
pub enum SimulatedOperation {
    CreateProfile { tenant: usize, writer: usize },
    RenameProfile { tenant: usize, writer: usize, profile: ProfileId },
    SetProfileActive { tenant: usize, writer: usize, profile: ProfileId, active: bool },
    DeleteProfile { tenant: usize, writer: usize, profile: ProfileId },
    AddNote { tenant: usize, writer: usize, profile: ProfileId },
    RecordEmotion { login_code: String },
    RecordGame { login_code: String },
    BlankNote { tenant: usize, writer: usize, profile: ProfileId },
    EmptyUpdate { tenant: usize, writer: usize, profile: ProfileId },
    DuplicateLoginCode { tenant: usize, writer: usize, login_code: String },
    CrossTenantNote { tenant: usize, writer: usize, profile: ProfileId },
    CrossTenantDelete { tenant: usize, writer: usize, profile: ProfileId },
}

impl SimulatedOperation {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateProfile { .. } => "create_profile",
            Self::RenameProfile { .. } => "rename_profile",
            Self::SetProfileActive { .. } => "set_profile_active",
            Self::DeleteProfile { .. } => "delete_profile",
            Self::AddNote { .. } => "add_note",
            Self::RecordEmotion { .. } => "record_emotion",
            Self::RecordGame { .. } => "record_game",
            Self::BlankNote { .. } => "blank_note",
            Self::EmptyUpdate { .. } => "empty_update",
            Self::DuplicateLoginCode { .. } => "duplicate_login_code",
            Self::CrossTenantNote { .. } => "cross_tenant_note",
            Self::CrossTenantDelete { .. } => "cross_tenant_delete",
        }
    }

    #[must_use]
    pub fn expected(&self) -> ExpectedResult {
        match self {
            Self::BlankNote { .. }
            | Self::EmptyUpdate { .. }
            | Self::DuplicateLoginCode { .. }
            | Self::CrossTenantNote { .. }
            | Self::CrossTenantDelete { .. } => ExpectedResult::ShouldFail,
            _ => ExpectedResult::ShouldSucceed,
        }
    }
}

/// Run one seeded simulation and check every property along the way
///
/// # Errors
/// Only when the simulated deployment cannot be set up; property violations
/// are reported, not returned.
pub async fn run_simulation(config: SimulatorConfig) -> Result<SimulatorReport> {
    ensure!(config.tenants > 0, "at least one tenant is required");
    ensure!(
        (0.0..=1.0).contains(&config.disconnect_rate) && (0.0..=1.0).contains(&config.invalid_rate),
        "rates must lie within 0..=1"
    );
    let started = Instant::now();
    let mut world = SimWorld::build(&config.sync, config.tenants, config.sessions_per_tenant).await?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = OperationStats::default();
    let mut violations = Vec::new();

    tracing::info!(
        seed = config.seed,
        tenants = config.tenants,
        sessions = world.session_count(),
        operations = config.total_operations,
        "simulation started"
    );

    for i in 0..config.total_operations {
        let operation = generate_operation(&mut rng, &config, &world);
        let expected = operation.expected();

        let before = if expected == ExpectedResult::ShouldFail {
            Some(world.fingerprint().await?)
        } else {
            None
        };

        let outcome = execute_operation(&mut world, &operation).await;
        stats.record(operation.kind(), outcome.is_ok());

        let matches = matches!(
            (expected, &outcome),
            (ExpectedResult::ShouldSucceed, Ok(())) | (ExpectedResult::ShouldFail, Err(_))
        );
        if !matches {
            violations.push(Violation::UnexpectedOutcome {
                operation_index: i,
                operation: format!("{operation:?}"),
                expected,
                actual: outcome.clone().map_err(|e| e.to_string()),
            });
        }

        if let Some(before) = before {
            if world.fingerprint().await? != before {
                violations.push(Violation::invariant(
                    InvariantCheck::RejectedWriteLeftStoreUnchanged,
                    format!("operation {i}: {operation:?}"),
                ));
            }
        }

        violations.extend(world.foreign_records());

        if rng.gen_bool(config.disconnect_rate) {
            sever_random_session(&mut rng, &world);
            stats.disconnects += 1;
        }

        if config
            .checkpoint_interval
            .is_some_and(|every| every > 0 && (i + 1) % every == 0)
        {
            violations.extend(world.converge(config.settle_timeout).await);
            violations.extend(world.orphans());
        }

        if config.stop_on_first_violation && !violations.is_empty() {
            break;
        }
    }

    violations.extend(world.converge(config.settle_timeout).await);
    violations.extend(world.foreign_records());
    violations.extend(world.orphans());

    let final_profile_count = world.store.profile_count();
    let sessions = world.session_count();
    world.shutdown().await;

    let report = SimulatorReport {
        seed: config.seed,
        tenants: config.tenants,
        sessions,
        stats,
        violations,
        final_profile_count,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        passed = report.passed(),
        violations = report.violations.len(),
        "simulation finished"
    );
    Ok(report)
}

fn sever_random_session(rng: &mut StdRng, world: &SimWorld) {
    let tenant = &world.tenants[rng.gen_range(0..world.tenants.len())];
    let session = &tenant.sessions[rng.gen_range(0..tenant.sessions.len())];
    let severed = world.server.bus().disconnect_session(session.ctx.session_id);
    tracing::debug!(session = %session.ctx.session_id, severed, "session severed");
}

fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.gen_range(0..items.len())])
    }
}

pub(crate) fn generate_operation(
    rng: &mut StdRng,
    config: &SimulatorConfig,
    world: &SimWorld,
) -> SimulatedOperation {
    let tenant = rng.gen_range(0..world.tenants.len());
    let writer = rng.gen_range(0..world.tenants[tenant].sessions.len());

    if rng.gen_bool(config.invalid_rate) {
        if let Some(op) = generate_invalid_operation(rng, world, tenant, writer) {
            return op;
        }
    }
    generate_valid_operation(rng, world, tenant, writer)
}

fn generate_valid_operation(
    rng: &mut StdRng,
    world: &SimWorld,
    tenant: usize,
    writer: usize,
) -> SimulatedOperation {
    let profiles = &world.tenants[tenant].profiles;
    let Some(target) = pick(rng, profiles) else {
        return SimulatedOperation::CreateProfile { tenant, writer };
    };
    let profile = target.id;

    match rng.gen_range(0..10) {
        0 | 1 => SimulatedOperation::CreateProfile { tenant, writer },
        2 => SimulatedOperation::RenameProfile { tenant, writer, profile },
        3 => SimulatedOperation::SetProfileActive {
            tenant,
            writer,
            profile,
            active: !target.active,
        },
        4 => SimulatedOperation::DeleteProfile { tenant, writer, profile },
        5 | 6 => SimulatedOperation::AddNote { tenant, writer, profile },
        n => {
            let active: Vec<&TrackedProfile> = profiles.iter().filter(|p| p.active).collect();
            match pick(rng, &active) {
                Some(child) if n == 7 || n == 8 => SimulatedOperation::RecordEmotion {
                    login_code: child.login_code.clone(),
                },
                Some(child) => SimulatedOperation::RecordGame {
                    login_code: child.login_code.clone(),
                },
                None => SimulatedOperation::CreateProfile { tenant, writer },
            }
        }
    }
}

fn generate_invalid_operation(
    rng: &mut StdRng,
    world: &SimWorld,
    tenant: usize,
    writer: usize,
) -> Option<SimulatedOperation> {
    let own = pick(rng, &world.tenants[tenant].profiles).cloned();
    let foreign: Vec<&TrackedProfile> = world
        .tenants
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != tenant)
        .flat_map(|(_, t)| t.profiles.iter())
        .collect();
    let foreign = pick(rng, &foreign).map(|p| (*p).clone());

    let any = world.tenants.iter().flat_map(|t| t.profiles.iter()).collect::<Vec<_>>();
    let taken = pick(rng, &any).map(|p| p.login_code.clone());

    match rng.gen_range(0..5) {
        0 => own.map(|p| SimulatedOperation::BlankNote { tenant, writer, profile: p.id }),
        1 => own.map(|p| SimulatedOperation::EmptyUpdate { tenant, writer, profile: p.id }),
        2 => taken.map(|login_code| SimulatedOperation::DuplicateLoginCode { tenant, writer, login_code }),
        3 => foreign.map(|p| SimulatedOperation::CrossTenantNote { tenant, writer, profile: p.id }),
        _ => foreign.map(|p| SimulatedOperation::CrossTenantDelete { tenant, writer, profile: p.id }),
    }
}

/// Execute against the server and keep the tracked profiles in step
pub(crate) async fn execute_operation(
    world: &mut SimWorld,
    operation: &SimulatedOperation,
) -> Result<(), SyncError> {
    let server = std::sync::Arc::clone(&world.server);

    match operation {
        SimulatedOperation::CreateProfile { tenant, writer } => {
            let code = world.codes.next();
            let ctx = world.tenants[*tenant].writer(*writer).clone();
            let profile = server.create_profile(&ctx, SimWorld::new_profile(&code)).await?;
            world.tenants[*tenant].profiles.push(TrackedProfile {
                id: profile.id,
                login_code: code,
                active: profile.active,
            });
        }
        SimulatedOperation::RenameProfile { tenant, writer, profile } => {
            let changes = ProfileChanges {
                display_name: Some(format!("Renamed {}", profile)),
                ..ProfileChanges::default()
            };
            server
                .update_profile(world.tenants[*tenant].writer(*writer), *profile, changes)
                .await?;
        }
        SimulatedOperation::SetProfileActive { tenant, writer, profile, active } => {
            let updated = server
                .set_profile_active(world.tenants[*tenant].writer(*writer), *profile, *active)
                .await?;
            if let Some(tracked) = world.tenants[*tenant].profiles.iter_mut().find(|p| p.id == *profile) {
                tracked.active = updated.active;
            }
        }
        SimulatedOperation::DeleteProfile { tenant, writer, profile } => {
            server
                .delete_profile(world.tenants[*tenant].writer(*writer), *profile)
                .await?;
            world.tenants[*tenant].profiles.retain(|p| p.id != *profile);
        }
        SimulatedOperation::AddNote { tenant, writer, profile } => {
            let input = NewNote {
                text: format!("observation on {profile}"),
            };
            server
                .add_note(world.tenants[*tenant].writer(*writer), *profile, input)
                .await?;
        }
        SimulatedOperation::RecordEmotion { login_code } => {
            let child = child_session(world, login_code).await?;
            let label = EMOTIONS[login_code.len() % EMOTIONS.len()];
            server
                .record_emotion_sample(
                    &child,
                    NewEmotionSample {
                        label: label.to_string(),
                        context: "simulated".to_string(),
                        observed_at: None,
                    },
                )
                .await?;
        }
        SimulatedOperation::RecordGame { login_code } => {
            let child = child_session(world, login_code).await?;
            server
                .record_game_result(
                    &child,
                    NewGameResult {
                        score: 1,
                        emotion_labels: vec![EMOTIONS[0].to_string()],
                        context: "simulated".to_string(),
                        correct: true,
                        completed_at: None,
                    },
                )
                .await?;
        }
        SimulatedOperation::BlankNote { tenant, writer, profile } => {
            let input = NewNote { text: "   ".to_string() };
            server
                .add_note(world.tenants[*tenant].writer(*writer), *profile, input)
                .await?;
        }
        SimulatedOperation::EmptyUpdate { tenant, writer, profile } => {
            server
                .update_profile(world.tenants[*tenant].writer(*writer), *profile, ProfileChanges::default())
                .await?;
        }
        SimulatedOperation::DuplicateLoginCode { tenant, writer, login_code } => {
            let mut input = SimWorld::new_profile(login_code);
            input.contact = format!("+1444{}", world.codes.next());
            server
                .create_profile(world.tenants[*tenant].writer(*writer), input)
                .await?;
        }
        SimulatedOperation::CrossTenantNote { tenant, writer, profile } => {
            let input = NewNote {
                text: "should never land".to_string(),
            };
            server
                .add_note(world.tenants[*tenant].writer(*writer), *profile, input)
                .await?;
        }
        SimulatedOperation::CrossTenantDelete { tenant, writer, profile } => {
            server
                .delete_profile(world.tenants[*tenant].writer(*writer), *profile)
                .await?;
        }
    }
    Ok(())
}

async fn child_session(world: &SimWorld, login_code: &str) -> Result<SessionContext, SyncError> {
    let login = world
        .server
        .login_child(login_code, crate::world::CHILD_SECRET)
        .await?;
    Ok(SessionContext::new(login.token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_kinds_expect_failure() {
        let profile = ProfileId::new();
        let rejected = [
            SimulatedOperation::BlankNote { tenant: 0, writer: 0, profile },
            SimulatedOperation::EmptyUpdate { tenant: 0, writer: 0, profile },
            SimulatedOperation::CrossTenantDelete { tenant: 0, writer: 0, profile },
        ];
        for op in &rejected {
            assert_eq!(op.expected(), ExpectedResult::ShouldFail, "{}", op.kind());
        }
        assert_eq!(
            SimulatedOperation::AddNote { tenant: 0, writer: 0, profile }.expected(),
            ExpectedResult::ShouldSucceed
        );
    }

    #[tokio::test]
    async fn same_seed_generates_same_operations() {
        let config = SimulatorConfig {
            tenants: 2,
            sessions_per_tenant: 1,
            ..SimulatorConfig::default()
        };
        let world = SimWorld::build(&config.sync, config.tenants, config.sessions_per_tenant)
            .await
            .unwrap();

        let ops = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| format!("{:?}", generate_operation(&mut rng, &config, &world)))
                .collect::<Vec<_>>()
        };
        assert_eq!(ops(9), ops(9));
        world.shutdown().await;
    }
}
