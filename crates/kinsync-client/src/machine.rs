//! Client Reconciliation State Machine
//!
//! One task per session drives:
//!
//! ```text
//! Disconnected -> Bootstrapping -> Live -> Disconnected (fault) -> Bootstrapping ...
//!        any state -> Closed (cancellation or rejected credential)
//! ```
//!
//! Bootstrapping subscribes first, then fetches the snapshot, so events
//! committed during the fetch queue up on the subscription instead of being
//! lost; the idempotent merge rules make replaying already-reflected events
//! harmless. A fault never attempts incremental catch-up: the subscription is
//! dropped and the next bootstrap replaces the view wholesale.

use crate::error::ClientError;
use crate::source::SyncSource;
use crate::state::{validate_transition, SyncState};
use crate::view::{LocalView, MergeOutcome};
use kinsync_bus::Subscription;
use kinsync_core::{SessionContext, SyncConfig, SyncError};
use kinsync_model::TenantSnapshot;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// View plus the cancellation flag, guarded together so no merge can land
/// after `close` has taken the lock
#[derive(Debug)]
struct Guarded {
    view: LocalView,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    guarded: RwLock<Guarded>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn merge(&self, apply: impl FnOnce(&mut LocalView) -> MergeOutcome) -> Option<MergeOutcome> {
        let mut guarded = self.guarded.write();
        if guarded.closed {
            return None;
        }
        let outcome = apply(&mut guarded.view);
        drop(guarded);

        if outcome == MergeOutcome::Applied {
            self.revision.send_modify(|r| *r += 1);
        }
        Some(outcome)
    }
}

/// Why a connected phase ended
enum Interrupt {
    Fault(String),
    Terminal(SyncError),
    Cancelled,
}

/// Owner's handle on a running session
///
/// Dropping the handle cancels the session.
#[derive(Debug)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    state: watch::Receiver<SyncState>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Copy of the current view
    #[must_use]
    pub fn view(&self) -> LocalView {
        self.shared.guarded.read().view.clone()
    }

    /// Run `read` against the current view without cloning it
    pub fn with_view<R>(&self, read: impl FnOnce(&LocalView) -> R) -> R {
        read(&self.shared.guarded.read().view)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target`
    ///
    /// # Errors
    /// `ClientError::Closed` if the session closes first
    pub async fn wait_for_state(&self, target: SyncState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s == target || *s == SyncState::Closed)
            .await
            .map_err(|_| ClientError::Closed)?;
        if *reached == target {
            Ok(())
        } else {
            Err(ClientError::Closed)
        }
    }

    /// Wait until `ready` holds for the view
    ///
    /// # Errors
    /// `ClientError::Closed` if the session closes first
    pub async fn wait_for_view(&self, ready: impl Fn(&LocalView) -> bool) -> Result<(), ClientError> {
        let mut revision = self.shared.revision.subscribe();
        let mut state = self.state.clone();
        loop {
            if self.with_view(&ready) {
                return Ok(());
            }
            if *state.borrow_and_update() == SyncState::Closed {
                return Err(ClientError::Closed);
            }
            tokio::select! {
                changed = revision.changed() => changed.map_err(|_| ClientError::Closed)?,
                changed = state.changed() => changed.map_err(|_| ClientError::Closed)?,
            }
        }
    }

    /// Cancel the session and wait for its task to finish
    ///
    /// Once this returns no event can change the view. The handle stays
    /// readable afterwards.
    pub async fn close(&mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "reconciliation task ended abnormally");
            }
        }
    }

    fn shutdown(&self) {
        self.shared.guarded.write().closed = true;
        self.cancel.send_replace(true);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns reconciliation tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationMachine;

impl ReconciliationMachine {
    /// Verify the session and start reconciling in the background
    ///
    /// # Errors
    /// `Unauthorized`, `Expired`, or `Forbidden` for non-administrator
    /// sessions; nothing is spawned then
    pub async fn connect<S>(
        source: Arc<S>,
        ctx: SessionContext,
        config: SyncConfig,
    ) -> Result<SessionHandle, SyncError>
    where
        S: SyncSource + 'static,
    {
        let tenant = source.session_tenant(&ctx).await?;

        let (revision, _) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            guarded: RwLock::new(Guarded {
                view: LocalView::new(tenant),
                closed: false,
            }),
            revision,
        });
        let (state_tx, state_rx) = watch::channel(SyncState::Disconnected);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let session = Session {
            source,
            ctx,
            config,
            shared: Arc::clone(&shared),
            state: state_tx,
            cancel: cancel_rx,
        };
        let task = tokio::spawn(session.run());

        Ok(SessionHandle {
            shared,
            state: state_rx,
            cancel: cancel_tx,
            task: Some(task),
        })
    }
}

struct Session<S: SyncSource> {
    source: Arc<S>,
    ctx: SessionContext,
    config: SyncConfig,
    shared: Arc<Shared>,
    state: watch::Sender<SyncState>,
    cancel: watch::Receiver<bool>,
}

impl<S: SyncSource> Session<S> {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            self.transition(SyncState::Bootstrapping);

            let interrupt = match self.bootstrap().await {
                Ok(subscription) => {
                    self.transition(SyncState::Live);
                    attempt = 0;
                    self.live(subscription).await
                }
                Err(interrupt) => interrupt,
            };

            match interrupt {
                Interrupt::Cancelled => break,
                Interrupt::Terminal(err) => {
                    tracing::warn!(session = %self.ctx.session_id, error = %err, "session credential rejected");
                    break;
                }
                Interrupt::Fault(reason) => {
                    self.transition(SyncState::Disconnected);
                    metrics::counter!("kinsync_client_resyncs_total").increment(1);

                    let delay = self.config.reconnect_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::debug!(
                        session = %self.ctx.session_id,
                        %reason,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "resynchronizing after fault"
                    );

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = self.cancel.wait_for(|c| *c) => break,
                    }
                }
            }
        }

        self.transition(SyncState::Closed);
    }

    /// Subscribe, then install a fresh snapshot
    async fn bootstrap(&mut self) -> Result<Subscription, Interrupt> {
        let subscription = tokio::select! {
            opened = self.source.open_event_channel(&self.ctx) => opened.map_err(classify)?,
            _ = self.cancel.wait_for(|c| *c) => return Err(Interrupt::Cancelled),
        };

        let timeout = self.config.bootstrap_timeout();
        let fetched = tokio::select! {
            fetched = tokio::time::timeout(timeout, self.source.fetch_snapshot(&self.ctx)) => fetched,
            _ = self.cancel.wait_for(|c| *c) => return Err(Interrupt::Cancelled),
        };
        let snapshot: TenantSnapshot = match fetched {
            Ok(result) => result.map_err(classify)?,
            Err(_) => return Err(Interrupt::Fault("bootstrap timed out".to_string())),
        };

        let profiles = snapshot.profiles.len();
        match self.shared.merge(|view| view.replace(snapshot)) {
            None => Err(Interrupt::Cancelled),
            Some(MergeOutcome::Rejected) => Err(Interrupt::Terminal(SyncError::Forbidden)),
            Some(_) => {
                tracing::debug!(session = %self.ctx.session_id, profiles, "snapshot installed");
                Ok(subscription)
            }
        }
    }

    /// Merge events until the channel ends or the session is cancelled
    async fn live(&mut self, mut subscription: Subscription) -> Interrupt {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.wait_for(|c| *c) => return Interrupt::Cancelled,
                next = subscription.next() => next,
            };

            let Some(event) = next else {
                return Interrupt::Fault("event channel closed".to_string());
            };

            match self.shared.merge(|view| view.apply(&event)) {
                None => return Interrupt::Cancelled,
                Some(MergeOutcome::Rejected) => {
                    tracing::warn!(
                        session = %self.ctx.session_id,
                        tenant = %event.tenant_id,
                        kind = %event.kind(),
                        "foreign event rejected"
                    );
                }
                Some(outcome) => {
                    tracing::trace!(session = %self.ctx.session_id, kind = %event.kind(), ?outcome, "event merged");
                }
            }
        }
    }

    fn transition(&self, to: SyncState) {
        let from = *self.state.borrow();
        if from == to {
            return;
        }
        match validate_transition(from, to) {
            Ok(()) => {
                self.state.send_replace(to);
                tracing::debug!(session = %self.ctx.session_id, %from, %to, "state changed");
            }
            Err(err) => tracing::error!(session = %self.ctx.session_id, error = %err, "transition refused"),
        }
    }
}

fn classify(err: SyncError) -> Interrupt {
    if err.is_terminal_for_session() {
        Interrupt::Terminal(err)
    } else {
        Interrupt::Fault(err.to_string())
    }
}
