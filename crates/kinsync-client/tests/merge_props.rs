//! Properties of the view merge rules

use chrono::{Duration, TimeZone, Utc};
use kinsync_client::{LocalView, MergeOutcome};
use kinsync_model::{
    DomainEvent, EmotionSample, EventPayload, GameResult, LoginCode, ManagedProfile, Note, NoteId,
    ProfileId, TenantId,
};
use proptest::prelude::*;

/// Fixed pool of events over three profiles of one tenant, plus one foreign
/// event
fn event_pool(tenant: TenantId) -> Vec<DomainEvent> {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let foreign = TenantId::new();
    let mut events = Vec::new();

    for i in 0..3i64 {
        let profile = ManagedProfile {
            id: ProfileId::new(),
            tenant_id: tenant,
            display_name: format!("Child {i}"),
            contact: format!("+155500000{i}"),
            login_code: LoginCode::parse(&format!("10000{i}")).unwrap(),
            active: true,
            created_at: base + Duration::minutes(i),
            revision: 1,
        };
        let mut renamed = profile.clone();
        renamed.display_name = format!("Renamed {i}");
        renamed.revision = 2;
        let mut paused = renamed.clone();
        paused.active = false;
        paused.revision = 3;

        events.push(EventPayload::ProfileCreated(profile.clone()));
        events.push(EventPayload::ProfileUpdated(renamed));
        events.push(EventPayload::ProfileStatusChanged(paused));
        events.push(EventPayload::NoteAdded(Note {
            id: NoteId::new(),
            profile_id: profile.id,
            tenant_id: tenant,
            author_name: "Ada".into(),
            text: format!("note {i}"),
            created_at: base + Duration::minutes(10 + i),
        }));
        events.push(EventPayload::EmotionRecorded(EmotionSample {
            profile_id: profile.id,
            tenant_id: tenant,
            label: "happy".into(),
            context: String::new(),
            observed_at: base + Duration::minutes(20 - i),
        }));
        events.push(EventPayload::GameResultRecorded(GameResult {
            profile_id: profile.id,
            tenant_id: tenant,
            score: u32::try_from(i).unwrap(),
            emotion_labels: vec!["sad".into()],
            context: "round".into(),
            correct: i % 2 == 0,
            completed_at: base + Duration::minutes(30 + i),
        }));
        if i == 0 {
            events.push(EventPayload::ProfileDeleted {
                profile_id: profile.id,
            });
        }
    }

    let mut pool: Vec<DomainEvent> = events
        .into_iter()
        .map(|payload| DomainEvent::new(tenant, payload))
        .collect();
    pool.push(DomainEvent::new(
        foreign,
        EventPayload::ProfileDeleted {
            profile_id: ProfileId::new(),
        },
    ));
    pool
}

/// Events in commit order: three profiles of six events each, one deletion,
/// one foreign event
const POOL_LEN: usize = 20;

#[test]
fn pool_is_in_commit_order() {
    let tenant = TenantId::new();
    let pool = event_pool(tenant);
    assert_eq!(pool.len(), POOL_LEN);

    let mut view = LocalView::new(tenant);
    for event in &pool {
        view.apply(event);
    }
    assert_eq!(view.profiles().len(), 2);
    assert!(view.profiles().iter().all(|p| p.revision == 3 && !p.active));
    assert_eq!(view.notes().len(), 2);
}

proptest! {
    #[test]
    fn prop_applying_twice_equals_once(picks in prop::collection::vec(0usize..22, 0..40)) {
        let tenant = TenantId::new();
        let pool = event_pool(tenant);
        let mut once = LocalView::new(tenant);
        let mut twice = LocalView::new(tenant);

        for i in picks {
            let event = &pool[i % pool.len()];
            once.apply(event);
            twice.apply(event);
            let again = twice.apply(event);
            prop_assert_ne!(again, MergeOutcome::Applied);
            prop_assert_eq!(&once, &twice);
        }
    }

    #[test]
    fn prop_view_never_holds_orphans_or_foreign_records(picks in prop::collection::vec(0usize..22, 0..40)) {
        let tenant = TenantId::new();
        let pool = event_pool(tenant);
        let mut view = LocalView::new(tenant);

        for i in picks {
            view.apply(&pool[i % pool.len()]);

            let known = |id: ProfileId| view.profile(id).is_some();
            prop_assert!(view.notes().iter().all(|n| known(n.profile_id)));
            prop_assert!(view.emotions().iter().all(|s| known(s.profile_id)));
            prop_assert!(view.games().iter().all(|g| known(g.profile_id)));
            prop_assert!(view.profiles().iter().all(|p| p.tenant_id == tenant));
        }
    }

    #[test]
    fn prop_arrival_order_does_not_change_the_outcome(
        order in Just((0..POOL_LEN).collect::<Vec<usize>>()).prop_shuffle()
    ) {
        let tenant = TenantId::new();
        let pool = event_pool(tenant);

        let mut committed = LocalView::new(tenant);
        for event in &pool {
            committed.apply(event);
        }
        let mut arrived = LocalView::new(tenant);
        for i in order {
            arrived.apply(&pool[i]);
        }

        prop_assert!(arrived.matches(&committed.snapshot()));
    }

    #[test]
    fn prop_samples_stay_ordered(picks in prop::collection::vec(0usize..22, 0..40)) {
        let tenant = TenantId::new();
        let pool = event_pool(tenant);
        let mut view = LocalView::new(tenant);

        for i in picks {
            view.apply(&pool[i % pool.len()]);
        }
        prop_assert!(view.emotions().windows(2).all(|w| w[0].observed_at <= w[1].observed_at));
        prop_assert!(view.profiles().windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }
}
