//! Session reconciliation against a live in-process server

use async_trait::async_trait;
use kinsync_bus::Subscription;
use kinsync_client::{ClientError, ReconciliationMachine, SessionHandle, SyncSource, SyncState};
use kinsync_core::{SessionContext, SyncConfig, SyncError, SyncServer};
use kinsync_model::{
    DomainEvent, EventPayload, NewEmotionSample, NewNote, ProfileChanges, TenantId, TenantSnapshot,
};
use kinsync_test_utils::TestWorld;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> SyncConfig {
    SyncConfig::new()
        .with_bootstrap_timeout(Duration::from_millis(500))
        .with_reconnect_backoff(Duration::from_millis(10), Duration::from_millis(50))
}

async fn connect(world: &TestWorld, ctx: &SessionContext) -> SessionHandle {
    let handle = ReconciliationMachine::connect(world.server.clone(), ctx.clone(), fast_config())
        .await
        .unwrap();
    timeout(WAIT, handle.wait_for_state(SyncState::Live))
        .await
        .unwrap()
        .unwrap();
    handle
}

async fn converge(world: &TestWorld, handle: &SessionHandle, ctx: &SessionContext) -> TenantSnapshot {
    let truth = world.server.fetch_snapshot(ctx).await.unwrap();
    timeout(WAIT, handle.wait_for_view(|view| view.matches(&truth)))
        .await
        .expect("view did not converge")
        .unwrap();
    truth
}

fn rename(name: &str) -> ProfileChanges {
    ProfileChanges {
        display_name: Some(name.to_string()),
        ..ProfileChanges::default()
    }
}

fn note(text: &str) -> NewNote {
    NewNote {
        text: text.to_string(),
    }
}

#[tokio::test]
async fn note_appears_in_peer_session_without_fetch() {
    let world = TestWorld::new().await;
    let (admin, s1) = world.admin(None).await;
    let s2 = world.admin_session(&admin).await;
    let (_, s3) = world.admin(None).await;
    let profile = world.profile(&s1, "123456").await;

    let peer = connect(&world, &s2).await;
    let outsider = connect(&world, &s3).await;
    let reads_before = world.store.read_count();

    let written = world.server.add_note(&s1, profile.id, note("napped")).await.unwrap();

    timeout(WAIT, peer.wait_for_view(|v| v.notes().contains(&written)))
        .await
        .unwrap()
        .unwrap();
    // Only the writer's own ownership check touched the store.
    assert_eq!(world.store.read_count(), reads_before + 1);

    let view = outsider.view();
    assert!(view.notes().is_empty());
    assert!(view.profiles().is_empty());
    assert_ne!(view.tenant_id(), profile.tenant_id);
}

#[tokio::test]
async fn resync_after_gap_matches_uninterrupted_session() {
    let world = TestWorld::new().await;
    let (admin, writer) = world.admin(None).await;
    let steady_ctx = world.admin_session(&admin).await;
    let flaky_ctx = world.admin_session(&admin).await;
    let p = world.profile(&writer, "123456").await;
    let doomed = world.profile(&writer, "222222").await;

    let steady = connect(&world, &steady_ctx).await;
    let config = fast_config()
        .with_reconnect_backoff(Duration::from_millis(300), Duration::from_millis(300));
    let flaky = ReconciliationMachine::connect(world.server.clone(), flaky_ctx.clone(), config)
        .await
        .unwrap();
    timeout(WAIT, flaky.wait_for_state(SyncState::Live)).await.unwrap().unwrap();

    assert!(world.server.bus().disconnect_session(flaky_ctx.session_id));
    timeout(WAIT, flaky.wait_for_state(SyncState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    // Three commits while the session is away.
    world.server.add_note(&writer, p.id, note("gap")).await.unwrap();
    world
        .server
        .update_profile(
            &writer,
            p.id,
            ProfileChanges {
                display_name: Some("Renamed".into()),
                ..ProfileChanges::default()
            },
        )
        .await
        .unwrap();
    world.server.delete_profile(&writer, doomed.id).await.unwrap();

    let truth = converge(&world, &flaky, &writer).await;
    converge(&world, &steady, &writer).await;

    assert!(steady.view().matches(&truth));
    assert!(flaky.view().matches(&truth));
    assert!(flaky.view().profile(doomed.id).is_none());
    assert_eq!(flaky.state(), SyncState::Live);
}

#[tokio::test]
async fn racing_updates_settle_on_the_last_commit() {
    let world = TestWorld::new().await;
    let (admin, first_writer) = world.admin(None).await;
    let second_writer = world.admin_session(&admin).await;
    let viewer_ctx = world.admin_session(&admin).await;
    let p = world.profile(&first_writer, "123456").await;
    let viewer = connect(&world, &viewer_ctx).await;

    // The first update persists, then stalls before it can publish.
    world.store.stall_next_update(Duration::from_millis(200));
    let server = world.server.clone();
    let id = p.id;
    let first = tokio::spawn(async move {
        server.update_profile(&first_writer, id, rename("First")).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    world
        .server
        .update_profile(&second_writer, p.id, rename("Second"))
        .await
        .unwrap();
    first.await.unwrap().unwrap();

    let truth = converge(&world, &viewer, &viewer_ctx).await;
    let stored = truth.profiles.iter().find(|q| q.id == p.id).unwrap();
    assert_eq!(stored.display_name, "Second");
    assert_eq!(
        viewer.view().profile(p.id).map(|q| q.display_name.clone()),
        Some("Second".to_string())
    );
    assert_eq!(viewer.state(), SyncState::Live);
}

#[tokio::test]
async fn late_event_from_another_server_is_ignored() {
    let world = TestWorld::new().await;
    let (_, admin) = world.admin(None).await;
    let p = world.profile(&admin, "123456").await;
    let renamed = world.server.update_profile(&admin, p.id, rename("Current")).await.unwrap();
    let handle = connect(&world, &admin).await;

    // A peer server sharing the store publishes an older state late.
    let mut stale = renamed.clone();
    stale.display_name = "Stale".into();
    stale.revision = renamed.revision - 1;
    world
        .server
        .bus()
        .publish(&DomainEvent::new(p.tenant_id, EventPayload::ProfileUpdated(stale)));

    let written = world.server.add_note(&admin, p.id, note("after")).await.unwrap();
    timeout(WAIT, handle.wait_for_view(|v| v.notes().contains(&written)))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(handle.view().profile(p.id), Some(&renamed));
    converge(&world, &handle, &admin).await;
}

#[tokio::test]
async fn deletion_clears_dependents_in_live_views() {
    let world = TestWorld::new().await;
    let (_, admin) = world.admin(None).await;
    let p = world.profile(&admin, "123456").await;
    world.server.add_note(&admin, p.id, note("one")).await.unwrap();
    let child = world.child_session("123456").await;
    world
        .server
        .record_emotion_sample(
            &child,
            NewEmotionSample {
                label: "calm".into(),
                context: String::new(),
                observed_at: None,
            },
        )
        .await
        .unwrap();

    let handle = connect(&world, &admin).await;
    assert_eq!(handle.view().notes().len(), 1);
    assert_eq!(handle.view().emotions().len(), 1);

    world.server.delete_profile(&admin, p.id).await.unwrap();
    timeout(WAIT, handle.wait_for_view(|v| v.profiles().is_empty()))
        .await
        .unwrap()
        .unwrap();

    let view = handle.view();
    assert!(view.notes().is_empty());
    assert!(view.emotions().is_empty());
}

#[tokio::test]
async fn unavailable_bootstrap_retries_until_store_recovers() {
    let world = TestWorld::new().await;
    let (_, admin) = world.admin(None).await;
    world.profile(&admin, "123456").await;

    world.store.fail_reads(true);
    let handle = ReconciliationMachine::connect(world.server.clone(), admin.clone(), fast_config())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_ne!(handle.state(), SyncState::Live);
    assert!(handle.view().profiles().is_empty());

    world.store.fail_reads(false);
    timeout(WAIT, handle.wait_for_state(SyncState::Live))
        .await
        .unwrap()
        .unwrap();
    converge(&world, &handle, &admin).await;
}

#[tokio::test]
async fn close_stops_merges() {
    let world = TestWorld::new().await;
    let (_, admin) = world.admin(None).await;
    let mut handle = connect(&world, &admin).await;

    handle.close().await;
    assert_eq!(handle.state(), SyncState::Closed);
    assert_eq!(world.server.bus().session_count(), 0);

    world.profile(&admin, "123456").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.view().profiles().is_empty());
    assert_eq!(
        handle.wait_for_state(SyncState::Live).await,
        Err(ClientError::Closed)
    );
}

#[tokio::test]
async fn revoked_admin_closes_on_reconnect() {
    let world = TestWorld::new().await;
    let (account, admin) = world.admin(None).await;
    let handle = connect(&world, &admin).await;

    world
        .server
        .set_admin_active(&world.super_ctx, account.id, false)
        .await
        .unwrap();
    world.server.bus().disconnect_session(admin.session_id);

    timeout(WAIT, handle.wait_for_state(SyncState::Closed))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn child_cannot_open_a_dashboard_session() {
    let world = TestWorld::new().await;
    let (_, admin) = world.admin(None).await;
    world.profile(&admin, "123456").await;
    let child = world.child_session("123456").await;

    let result = ReconciliationMachine::connect(world.server.clone(), child, fast_config()).await;
    assert_eq!(result.map(|_| ()), Err(SyncError::Forbidden));
}

/// Source whose first snapshot fetch hangs past the bootstrap timeout
struct SlowFirstFetch {
    server: Arc<SyncServer>,
    fetches: AtomicUsize,
}

#[async_trait]
impl SyncSource for SlowFirstFetch {
    async fn session_tenant(&self, ctx: &SessionContext) -> Result<TenantId, SyncError> {
        self.server.session_tenant(ctx).await
    }

    async fn open_event_channel(&self, ctx: &SessionContext) -> Result<Subscription, SyncError> {
        SyncSource::open_event_channel(self.server.as_ref(), ctx).await
    }

    async fn fetch_snapshot(&self, ctx: &SessionContext) -> Result<TenantSnapshot, SyncError> {
        if self.fetches.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        SyncSource::fetch_snapshot(self.server.as_ref(), ctx).await
    }
}

#[tokio::test]
async fn bootstrap_timeout_is_a_transient_fault() {
    let world = TestWorld::new().await;
    let (_, admin) = world.admin(None).await;
    world.profile(&admin, "123456").await;

    let source = Arc::new(SlowFirstFetch {
        server: world.server.clone(),
        fetches: AtomicUsize::new(0),
    });
    let config = fast_config().with_bootstrap_timeout(Duration::from_millis(50));
    let handle = ReconciliationMachine::connect(source.clone(), admin.clone(), config)
        .await
        .unwrap();

    timeout(WAIT, handle.wait_for_state(SyncState::Live))
        .await
        .unwrap()
        .unwrap();
    assert!(source.fetches.load(Ordering::SeqCst) >= 2);
    assert_eq!(handle.view().profiles().len(), 1);
}
