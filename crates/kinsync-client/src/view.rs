//! Locally held, eventually consistent view of one tenant
//!
//! Events may arrive in any order relative to the store's commit order, so
//! every rule is keyed on what the store stamped rather than on arrival:
//!
//! | kind | rule |
//! |---|---|
//! | `ProfileCreated`, `ProfileUpdated`, `ProfileStatusChanged` | keep the highest `revision` seen per profile |
//! | `ProfileDeleted` | remove profile plus its notes, samples and results; remember the id |
//! | `NoteAdded`, `EmotionRecorded`, `GameResultRecorded` | append unless an equal record is held |
//!
//! A profile becomes visible only through `ProfileCreated` or a snapshot.
//! Changes and records that arrive before it are held back and surface with
//! it. Anything arriving for a deleted profile is dropped. Every rule is
//! idempotent: applying an event twice leaves the same view as applying it
//! once.

use kinsync_model::{
    DomainEvent, EmotionSample, EventPayload, GameResult, ManagedProfile, Note, ProfileId,
    TenantId, TenantSnapshot,
};
use std::collections::{HashMap, HashSet};

/// Result of merging one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The view changed
    Applied,
    /// Duplicate or stale; the view is unchanged
    Ignored,
    /// Event belongs to another tenant; the view is unchanged
    Rejected,
}

/// Profiles and their records as one session sees them
///
/// Kept in listing order: profiles and notes newest first, samples by
/// `observed_at`, results by `completed_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalView {
    snapshot: TenantSnapshot,
    held_back: HashMap<ProfileId, HeldBack>,
    deleted: HashSet<ProfileId>,
}

/// What arrived for a profile the view does not show yet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HeldBack {
    profile: Option<ManagedProfile>,
    notes: Vec<Note>,
    emotions: Vec<EmotionSample>,
    games: Vec<GameResult>,
}

enum Placement {
    Visible,
    HeldBack,
    Dropped,
}

impl LocalView {
    /// Empty view of `tenant`
    #[must_use]
    pub fn new(tenant: TenantId) -> Self {
        Self {
            snapshot: TenantSnapshot::empty(tenant),
            held_back: HashMap::new(),
            deleted: HashSet::new(),
        }
    }

    /// View installed from a bootstrap snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: TenantSnapshot) -> Self {
        let mut view = Self::new(snapshot.tenant_id);
        view.replace(snapshot);
        view
    }

    /// Tenant this view belongs to
    #[inline]
    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.snapshot.tenant_id
    }

    #[must_use]
    pub fn profiles(&self) -> &[ManagedProfile] {
        &self.snapshot.profiles
    }

    #[must_use]
    pub fn notes(&self) -> &[Note] {
        &self.snapshot.notes
    }

    #[must_use]
    pub fn emotions(&self) -> &[EmotionSample] {
        &self.snapshot.emotions
    }

    #[must_use]
    pub fn games(&self) -> &[GameResult] {
        &self.snapshot.games
    }

    #[must_use]
    pub fn profile(&self, id: ProfileId) -> Option<&ManagedProfile> {
        self.snapshot.profiles.iter().find(|p| p.id == id)
    }

    /// Notes of one profile, newest first
    pub fn notes_for(&self, id: ProfileId) -> impl Iterator<Item = &Note> {
        self.snapshot.notes.iter().filter(move |n| n.profile_id == id)
    }

    /// Copy of the held state
    #[must_use]
    pub fn snapshot(&self) -> TenantSnapshot {
        self.snapshot.clone()
    }

    /// Whether the view holds exactly the records of `other`, ignoring ties in
    /// ordering
    #[must_use]
    pub fn matches(&self, other: &TenantSnapshot) -> bool {
        canonical(self.snapshot.clone()) == canonical(other.clone())
    }

    /// Replace the whole view with a bootstrap result
    ///
    /// Nothing visible from the previous state survives, so records deleted
    /// while the session was away cannot reappear. Deleted ids are still
    /// remembered. A snapshot of another tenant is refused.
    pub fn replace(&mut self, snapshot: TenantSnapshot) -> MergeOutcome {
        if snapshot.tenant_id != self.snapshot.tenant_id {
            return MergeOutcome::Rejected;
        }
        let mut snapshot = snapshot;
        sort_listing(&mut snapshot);
        self.snapshot = snapshot;
        self.held_back.clear();
        MergeOutcome::Applied
    }

    /// Merge one event
    pub fn apply(&mut self, event: &DomainEvent) -> MergeOutcome {
        let tenant = self.snapshot.tenant_id;
        if event.tenant_id != tenant || record_tenant(&event.payload).is_some_and(|t| t != tenant) {
            return MergeOutcome::Rejected;
        }

        match &event.payload {
            EventPayload::ProfileCreated(profile) => self.upsert_profile(profile, true),
            EventPayload::ProfileUpdated(profile) | EventPayload::ProfileStatusChanged(profile) => {
                self.upsert_profile(profile, false)
            }
            EventPayload::ProfileDeleted { profile_id } => self.remove_profile(*profile_id),

            EventPayload::NoteAdded(note) => match self.placement(note.profile_id) {
                Placement::Visible => self.insert_note(note.clone()),
                Placement::HeldBack => {
                    let held = &mut self.held_back.entry(note.profile_id).or_default().notes;
                    if !held.contains(note) {
                        held.push(note.clone());
                    }
                    MergeOutcome::Ignored
                }
                Placement::Dropped => MergeOutcome::Ignored,
            },

            EventPayload::EmotionRecorded(sample) => match self.placement(sample.profile_id) {
                Placement::Visible => self.insert_emotion(sample.clone()),
                Placement::HeldBack => {
                    let held = &mut self.held_back.entry(sample.profile_id).or_default().emotions;
                    if !held.contains(sample) {
                        held.push(sample.clone());
                    }
                    MergeOutcome::Ignored
                }
                Placement::Dropped => MergeOutcome::Ignored,
            },

            EventPayload::GameResultRecorded(result) => match self.placement(result.profile_id) {
                Placement::Visible => self.insert_game(result.clone()),
                Placement::HeldBack => {
                    let held = &mut self.held_back.entry(result.profile_id).or_default().games;
                    if !held.contains(result) {
                        held.push(result.clone());
                    }
                    MergeOutcome::Ignored
                }
                Placement::Dropped => MergeOutcome::Ignored,
            },
        }
    }

    fn placement(&self, id: ProfileId) -> Placement {
        if self.deleted.contains(&id) {
            Placement::Dropped
        } else if self.profile(id).is_some() {
            Placement::Visible
        } else {
            Placement::HeldBack
        }
    }

    fn upsert_profile(&mut self, incoming: &ManagedProfile, created: bool) -> MergeOutcome {
        let id = incoming.id;
        if self.deleted.contains(&id) {
            return MergeOutcome::Ignored;
        }

        if let Some(held) = self.snapshot.profiles.iter_mut().find(|p| p.id == id) {
            if incoming.revision <= held.revision {
                return MergeOutcome::Ignored;
            }
            *held = incoming.clone();
            return MergeOutcome::Applied;
        }

        let pending = self.held_back.entry(id).or_default();
        if pending.profile.as_ref().map_or(true, |p| incoming.revision > p.revision) {
            pending.profile = Some(incoming.clone());
        }
        if !created {
            return MergeOutcome::Ignored;
        }

        let Some(HeldBack {
            profile: Some(profile),
            notes,
            emotions,
            games,
        }) = self.held_back.remove(&id)
        else {
            return MergeOutcome::Ignored;
        };

        let at = self
            .snapshot
            .profiles
            .partition_point(|p| newer_profile(p, &profile));
        self.snapshot.profiles.insert(at, profile);
        for note in notes {
            self.insert_note(note);
        }
        for sample in emotions {
            self.insert_emotion(sample);
        }
        for result in games {
            self.insert_game(result);
        }
        MergeOutcome::Applied
    }

    fn remove_profile(&mut self, id: ProfileId) -> MergeOutcome {
        self.deleted.insert(id);
        self.held_back.remove(&id);

        let before = self.record_count();
        self.snapshot.profiles.retain(|p| p.id != id);
        self.snapshot.notes.retain(|n| n.profile_id != id);
        self.snapshot.emotions.retain(|s| s.profile_id != id);
        self.snapshot.games.retain(|g| g.profile_id != id);
        if self.record_count() == before {
            MergeOutcome::Ignored
        } else {
            MergeOutcome::Applied
        }
    }

    fn insert_note(&mut self, note: Note) -> MergeOutcome {
        if self.snapshot.notes.contains(&note) {
            return MergeOutcome::Ignored;
        }
        let at = self.snapshot.notes.partition_point(|n| newer_note(n, &note));
        self.snapshot.notes.insert(at, note);
        MergeOutcome::Applied
    }

    fn insert_emotion(&mut self, sample: EmotionSample) -> MergeOutcome {
        if self.snapshot.emotions.contains(&sample) {
            return MergeOutcome::Ignored;
        }
        let at = self
            .snapshot
            .emotions
            .partition_point(|s| s.observed_at <= sample.observed_at);
        self.snapshot.emotions.insert(at, sample);
        MergeOutcome::Applied
    }

    fn insert_game(&mut self, result: GameResult) -> MergeOutcome {
        if self.snapshot.games.contains(&result) {
            return MergeOutcome::Ignored;
        }
        let at = self
            .snapshot
            .games
            .partition_point(|g| g.completed_at <= result.completed_at);
        self.snapshot.games.insert(at, result);
        MergeOutcome::Applied
    }

    fn record_count(&self) -> usize {
        self.snapshot.profiles.len()
            + self.snapshot.notes.len()
            + self.snapshot.emotions.len()
            + self.snapshot.games.len()
    }
}

/// Tenant stamped on the record an event carries, if it carries one
fn record_tenant(payload: &EventPayload) -> Option<TenantId> {
    match payload {
        EventPayload::ProfileCreated(p)
        | EventPayload::ProfileUpdated(p)
        | EventPayload::ProfileStatusChanged(p) => Some(p.tenant_id),
        EventPayload::ProfileDeleted { .. } => None,
        EventPayload::NoteAdded(n) => Some(n.tenant_id),
        EventPayload::EmotionRecorded(s) => Some(s.tenant_id),
        EventPayload::GameResultRecorded(g) => Some(g.tenant_id),
    }
}

fn newer_profile(held: &ManagedProfile, incoming: &ManagedProfile) -> bool {
    held.created_at > incoming.created_at
        || (held.created_at == incoming.created_at && held.id < incoming.id)
}

fn newer_note(held: &Note, incoming: &Note) -> bool {
    held.created_at > incoming.created_at
        || (held.created_at == incoming.created_at && held.id < incoming.id)
}

fn sort_listing(snapshot: &mut TenantSnapshot) {
    snapshot
        .profiles
        .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    snapshot
        .notes
        .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    snapshot.emotions.sort_by(|a, b| a.observed_at.cmp(&b.observed_at));
    snapshot.games.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));
}

/// Snapshot with a total order on every list, for equality checks
#[must_use]
pub fn canonical(mut snapshot: TenantSnapshot) -> TenantSnapshot {
    snapshot.profiles.sort_by_key(|p| p.id);
    snapshot.notes.sort_by_key(|n| n.id);
    snapshot.emotions.sort_by(|a, b| {
        (a.profile_id, a.observed_at, &a.label, &a.context)
            .cmp(&(b.profile_id, b.observed_at, &b.label, &b.context))
    });
    snapshot.games.sort_by(|a, b| {
        (a.profile_id, a.completed_at, a.score, a.correct, &a.context, &a.emotion_labels).cmp(&(
            b.profile_id,
            b.completed_at,
            b.score,
            b.correct,
            &b.context,
            &b.emotion_labels,
        ))
    });
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use kinsync_model::{LoginCode, NoteId};
    use pretty_assertions::assert_eq;

    fn profile(tenant: TenantId, code: &str) -> ManagedProfile {
        ManagedProfile {
            id: ProfileId::new(),
            tenant_id: tenant,
            display_name: format!("Child {code}"),
            contact: format!("+1555{code}"),
            login_code: LoginCode::parse(code).unwrap(),
            active: true,
            created_at: Utc::now(),
            revision: 1,
        }
    }

    fn note(p: &ManagedProfile, text: &str) -> Note {
        Note {
            id: NoteId::new(),
            profile_id: p.id,
            tenant_id: p.tenant_id,
            author_name: "Ada".into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    fn sample(p: &ManagedProfile, label: &str, offset_secs: i64) -> EmotionSample {
        EmotionSample {
            profile_id: p.id,
            tenant_id: p.tenant_id,
            label: label.into(),
            context: String::new(),
            observed_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    fn event(tenant: TenantId, payload: EventPayload) -> DomainEvent {
        DomainEvent::new(tenant, payload)
    }

    #[test]
    fn created_twice_is_inserted_once() {
        let tenant = TenantId::new();
        let p = profile(tenant, "123456");
        let mut view = LocalView::new(tenant);

        let e = event(tenant, EventPayload::ProfileCreated(p.clone()));
        assert_eq!(view.apply(&e), MergeOutcome::Applied);
        assert_eq!(view.apply(&e), MergeOutcome::Ignored);
        assert_eq!(view.profiles(), &[p]);
    }

    #[test]
    fn update_for_absent_profile_is_ignored() {
        let tenant = TenantId::new();
        let mut view = LocalView::new(tenant);
        let e = event(tenant, EventPayload::ProfileUpdated(profile(tenant, "123456")));
        assert_eq!(view.apply(&e), MergeOutcome::Ignored);
        assert!(view.profiles().is_empty());
    }

    #[test]
    fn update_replaces_by_id() {
        let tenant = TenantId::new();
        let p = profile(tenant, "123456");
        let mut view = LocalView::new(tenant);
        view.apply(&event(tenant, EventPayload::ProfileCreated(p.clone())));

        let mut changed = p.clone();
        changed.active = false;
        changed.revision = 2;
        let e = event(tenant, EventPayload::ProfileStatusChanged(changed.clone()));
        assert_eq!(view.apply(&e), MergeOutcome::Applied);
        assert_eq!(view.apply(&e), MergeOutcome::Ignored);
        assert_eq!(view.profile(p.id), Some(&changed));
    }

    #[test]
    fn older_revision_never_overwrites_newer() {
        let tenant = TenantId::new();
        let p = profile(tenant, "123456");
        let mut view = LocalView::new(tenant);
        view.apply(&event(tenant, EventPayload::ProfileCreated(p.clone())));

        let mut first = p.clone();
        first.display_name = "First".into();
        first.revision = 2;
        let mut second = first.clone();
        second.display_name = "Second".into();
        second.revision = 3;

        // Published in the opposite order of their commits.
        let second_event = event(tenant, EventPayload::ProfileUpdated(second.clone()));
        assert_eq!(view.apply(&second_event), MergeOutcome::Applied);
        let first_event = event(tenant, EventPayload::ProfileUpdated(first));
        assert_eq!(view.apply(&first_event), MergeOutcome::Ignored);

        assert_eq!(view.profile(p.id), Some(&second));
    }

    #[test]
    fn changes_before_creation_surface_with_it() {
        let tenant = TenantId::new();
        let p = profile(tenant, "123456");
        let mut renamed = p.clone();
        renamed.display_name = "Renamed".into();
        renamed.revision = 2;
        let early_note = note(&p, "early");
        let mut view = LocalView::new(tenant);

        let rename = event(tenant, EventPayload::ProfileUpdated(renamed.clone()));
        assert_eq!(view.apply(&rename), MergeOutcome::Ignored);
        let add = event(tenant, EventPayload::NoteAdded(early_note.clone()));
        assert_eq!(view.apply(&add), MergeOutcome::Ignored);
        assert_eq!(view.apply(&add), MergeOutcome::Ignored);
        assert!(view.profiles().is_empty());
        assert!(view.notes().is_empty());

        let create = event(tenant, EventPayload::ProfileCreated(p.clone()));
        assert_eq!(view.apply(&create), MergeOutcome::Applied);
        assert_eq!(view.profiles(), &[renamed]);
        assert_eq!(view.notes(), &[early_note]);
    }

    #[test]
    fn nothing_revives_a_deleted_profile() {
        let tenant = TenantId::new();
        let p = profile(tenant, "123456");
        let mut view = LocalView::new(tenant);

        let delete = event(tenant, EventPayload::ProfileDeleted { profile_id: p.id });
        assert_eq!(view.apply(&delete), MergeOutcome::Ignored);

        let mut late = p.clone();
        late.revision = 5;
        for payload in [
            EventPayload::ProfileCreated(p.clone()),
            EventPayload::ProfileUpdated(late),
            EventPayload::NoteAdded(note(&p, "late")),
        ] {
            assert_eq!(view.apply(&event(tenant, payload)), MergeOutcome::Ignored);
        }
        assert!(view.profiles().is_empty());
        assert!(view.notes().is_empty());
    }

    #[test]
    fn delete_removes_dependents() {
        let tenant = TenantId::new();
        let p = profile(tenant, "123456");
        let q = profile(tenant, "654321");
        let mut view = LocalView::new(tenant);
        view.apply(&event(tenant, EventPayload::ProfileCreated(p.clone())));
        view.apply(&event(tenant, EventPayload::ProfileCreated(q.clone())));
        view.apply(&event(tenant, EventPayload::NoteAdded(note(&p, "a"))));
        let kept = note(&q, "b");
        view.apply(&event(tenant, EventPayload::NoteAdded(kept.clone())));
        view.apply(&event(tenant, EventPayload::EmotionRecorded(sample(&p, "happy", 0))));

        let delete = event(tenant, EventPayload::ProfileDeleted { profile_id: p.id });
        assert_eq!(view.apply(&delete), MergeOutcome::Applied);
        assert_eq!(view.apply(&delete), MergeOutcome::Ignored);
        assert_eq!(view.profiles(), &[q]);
        assert_eq!(view.notes(), &[kept]);
        assert!(view.emotions().is_empty());
    }

    #[test]
    fn append_for_unknown_profile_is_ignored() {
        let tenant = TenantId::new();
        let mut view = LocalView::new(tenant);
        let orphan = note(&profile(tenant, "123456"), "x");
        assert_eq!(
            view.apply(&event(tenant, EventPayload::NoteAdded(orphan))),
            MergeOutcome::Ignored
        );
        assert!(view.notes().is_empty());
    }

    #[test]
    fn foreign_tenant_is_rejected() {
        let mine = TenantId::new();
        let theirs = TenantId::new();
        let mut view = LocalView::new(mine);

        let e = event(theirs, EventPayload::ProfileCreated(profile(theirs, "123456")));
        assert_eq!(view.apply(&e), MergeOutcome::Rejected);

        // Envelope claims our tenant but the record says otherwise.
        let forged = event(mine, EventPayload::ProfileCreated(profile(theirs, "123456")));
        assert_eq!(view.apply(&forged), MergeOutcome::Rejected);
        assert!(view.profiles().is_empty());

        assert_eq!(view.replace(TenantSnapshot::empty(theirs)), MergeOutcome::Rejected);
    }

    #[test]
    fn samples_are_ordered_by_observation_not_arrival() {
        let tenant = TenantId::new();
        let p = profile(tenant, "123456");
        let mut view = LocalView::new(tenant);
        view.apply(&event(tenant, EventPayload::ProfileCreated(p.clone())));

        let late = sample(&p, "sad", 10);
        let early = sample(&p, "happy", -10);
        view.apply(&event(tenant, EventPayload::EmotionRecorded(late.clone())));
        view.apply(&event(tenant, EventPayload::EmotionRecorded(early.clone())));
        assert_eq!(view.emotions(), &[early, late]);
    }

    #[test]
    fn replace_discards_stale_state() {
        let tenant = TenantId::new();
        let stale = profile(tenant, "123456");
        let mut view = LocalView::new(tenant);
        view.apply(&event(tenant, EventPayload::ProfileCreated(stale)));

        let fresh = profile(tenant, "654321");
        let mut snapshot = TenantSnapshot::empty(tenant);
        snapshot.profiles.push(fresh.clone());
        view.replace(snapshot.clone());

        assert_eq!(view.profiles(), &[fresh]);
        assert!(view.matches(&snapshot));
    }
}
