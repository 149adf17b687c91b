//! Broadcast Bus
//!
//! Fan-out of committed domain events to the live sessions of one tenant.
//!
//! - Registry partitioned by `TenantId`; a publish only ever walks its own
//!   tenant's partition.
//! - Each subscriber owns an unbounded FIFO queue, so publishers never block
//!   on slow readers.
//! - No buffering for absent subscribers: an event published while a session
//!   is disconnected is gone for that session.
//! - Publishes to one tenant are serialized under the partition's write guard,
//!   so every subscriber of that tenant sees the same order.

use crate::session::SessionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::Stream;
use kinsync_model::{DomainEvent, TenantId};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Debug)]
struct Slot {
    generation: u64,
    sender: mpsc::UnboundedSender<DomainEvent>,
}

#[derive(Debug, Default)]
struct Registry {
    tenants: DashMap<TenantId, HashMap<SessionId, Slot>>,
    sessions: DashMap<SessionId, (TenantId, u64)>,
    next_generation: AtomicU64,
}

impl Registry {
    /// Remove the session's slot if it still belongs to `generation`
    ///
    /// `None` removes whatever generation is current.
    fn unregister(&self, session: SessionId, generation: Option<u64>) -> bool {
        let removed = self
            .sessions
            .remove_if(&session, |_, (_, current)| generation.map_or(true, |g| g == *current));
        let Some((_, (tenant, current))) = removed else {
            return false;
        };

        self.drop_slot(session, tenant, current);
        metrics::gauge!("kinsync_bus_subscriptions").decrement(1.0);
        tracing::debug!(session = %session, tenant = %tenant, "subscription closed");
        true
    }

    /// Drop the tenant-side slot of one generation, and the partition once empty
    fn drop_slot(&self, session: SessionId, tenant: TenantId, generation: u64) {
        let now_empty = match self.tenants.get_mut(&tenant) {
            Some(mut slots) => {
                if slots.get(&session).is_some_and(|slot| slot.generation == generation) {
                    slots.remove(&session);
                }
                slots.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.tenants.remove_if(&tenant, |_, slots| slots.is_empty());
        }
    }
}

/// Tenant-partitioned event bus
///
/// Cheap to clone; clones share one registry.
#[derive(Debug, Clone, Default)]
pub struct BroadcastBus {
    registry: Arc<Registry>,
}

impl BroadcastBus {
    /// Create an empty bus
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` to receive every subsequent event of `tenant`
    ///
    /// An existing subscription for the same session is closed first; its
    /// stream ends after yielding what was already queued.
    ///
    /// The caller must already have checked that the session's credential
    /// belongs to `tenant`. The bus performs no authorization.
    #[must_use]
    pub fn subscribe(&self, session: SessionId, tenant: TenantId) -> Subscription {
        let registry = &self.registry;
        let generation = registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let slot = Slot { generation, sender };

        // The session entry stays locked until the new slot is in place, so
        // concurrent subscribes of one session leave exactly one slot.
        let replaced = match registry.sessions.entry(session) {
            Entry::Occupied(mut held) => {
                let (old_tenant, old_generation) = *held.get();
                registry.drop_slot(session, old_tenant, old_generation);
                registry.tenants.entry(tenant).or_default().insert(session, slot);
                held.insert((tenant, generation));
                true
            }
            Entry::Vacant(vacant) => {
                registry.tenants.entry(tenant).or_default().insert(session, slot);
                vacant.insert((tenant, generation));
                false
            }
        };

        if replaced {
            tracing::debug!(session = %session, "previous subscription replaced");
        } else {
            metrics::gauge!("kinsync_bus_subscriptions").increment(1.0);
        }
        tracing::debug!(
            session = %session,
            tenant = %tenant,
            subscriber_count = self.subscriber_count(tenant),
            "subscription opened"
        );

        Subscription {
            session,
            tenant,
            generation,
            receiver,
            registry: Arc::clone(&self.registry),
            closed: false,
        }
    }

    /// Deliver `event` to every current subscriber of `event.tenant_id`
    ///
    /// Returns the number of subscribers the event was queued for. Zero
    /// subscribers is not an error.
    pub fn publish(&self, event: &DomainEvent) -> usize {
        metrics::counter!("kinsync_bus_published_total").increment(1);

        let Some(mut slots) = self.registry.tenants.get_mut(&event.tenant_id) else {
            tracing::debug!(tenant = %event.tenant_id, kind = %event.kind(), delivered = 0, "event published");
            return 0;
        };

        let mut delivered = 0usize;
        slots.retain(|session, slot| match slot.sender.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::debug!(session = %session, "dropping slot with closed receiver");
                false
            }
        });
        drop(slots);

        metrics::counter!("kinsync_bus_delivered_total").increment(delivered as u64);
        tracing::debug!(
            tenant = %event.tenant_id,
            kind = %event.kind(),
            delivered,
            "event published"
        );
        delivered
    }

    /// Close the session's subscription, if any
    ///
    /// Returns `true` when a subscription was removed.
    pub fn disconnect_session(&self, session: SessionId) -> bool {
        self.registry.unregister(session, None)
    }

    /// Live subscribers of `tenant`
    #[must_use]
    pub fn subscriber_count(&self, tenant: TenantId) -> usize {
        self.registry
            .tenants
            .get(&tenant)
            .map_or(0, |slots| slots.len())
    }

    /// Live subscriptions across all tenants
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.sessions.len()
    }
}

/// Receiving end of one session's subscription
///
/// Yields events in publish order. Ends (`None`) once the subscription is
/// closed, replaced, or disconnected and the queued events are drained.
/// Dropping it unregisters the session.
#[derive(Debug)]
pub struct Subscription {
    session: SessionId,
    tenant: TenantId,
    generation: u64,
    receiver: mpsc::UnboundedReceiver<DomainEvent>,
    registry: Arc<Registry>,
    closed: bool,
}

impl Subscription {
    /// Session this subscription belongs to
    #[inline]
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Tenant whose events this subscription receives
    #[inline]
    #[must_use]
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Next event, or `None` once the subscription has ended
    pub async fn next(&mut self) -> Option<DomainEvent> {
        self.receiver.recv().await
    }

    /// Next already-queued event without waiting
    pub fn try_next(&mut self) -> Option<DomainEvent> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving; already-queued events can still be drained
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.registry.unregister(self.session, Some(self.generation));
        }
        self.receiver.close();
    }
}

impl Stream for Subscription {
    type Item = DomainEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.closed {
            self.registry.unregister(self.session, Some(self.generation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use kinsync_model::{EventPayload, LoginCode, ManagedProfile, ProfileId};
    use pretty_assertions::assert_eq;

    fn deleted(tenant: TenantId) -> DomainEvent {
        DomainEvent::new(
            tenant,
            EventPayload::ProfileDeleted {
                profile_id: ProfileId::new(),
            },
        )
    }

    fn created(tenant: TenantId, name: &str) -> DomainEvent {
        DomainEvent::new(
            tenant,
            EventPayload::ProfileCreated(ManagedProfile {
                id: ProfileId::new(),
                tenant_id: tenant,
                display_name: name.to_string(),
                contact: "5550100".to_string(),
                login_code: LoginCode::parse("123456").unwrap(),
                active: true,
                created_at: Utc::now(),
                revision: 0,
            }),
        )
    }

    #[tokio::test]
    async fn delivers_only_to_own_tenant() {
        let bus = BroadcastBus::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        let mut s1 = bus.subscribe(SessionId::new(), t1);
        let mut s2 = bus.subscribe(SessionId::new(), t2);

        let event = created(t1, "Sam");
        assert_eq!(bus.publish(&event), 1);

        assert_eq!(s1.next().await, Some(event));
        assert_eq!(s2.try_next(), None);
    }

    #[tokio::test]
    async fn preserves_publish_order() {
        let bus = BroadcastBus::new();
        let tenant = TenantId::new();
        let mut sub = bus.subscribe(SessionId::new(), tenant);

        let events: Vec<_> = (0..20).map(|i| created(tenant, &format!("p{i}"))).collect();
        for e in &events {
            bus.publish(e);
        }

        let received: Vec<_> = (&mut sub).take(events.len()).collect().await;
        assert_eq!(received, events);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = BroadcastBus::new();
        let tenant = TenantId::new();
        assert_eq!(bus.publish(&deleted(tenant)), 0);

        let mut late = bus.subscribe(SessionId::new(), tenant);
        assert_eq!(late.try_next(), None);
    }

    #[tokio::test]
    async fn resubscribe_replaces_previous() {
        let bus = BroadcastBus::new();
        let tenant = TenantId::new();
        let session = SessionId::new();

        let mut old = bus.subscribe(session, tenant);
        let mut new = bus.subscribe(session, tenant);
        assert_eq!(bus.subscriber_count(tenant), 1);

        let event = deleted(tenant);
        assert_eq!(bus.publish(&event), 1);
        assert_eq!(old.next().await, None);
        assert_eq!(new.next().await, Some(event));

        // Dropping the stale handle must not unregister its replacement.
        drop(old);
        assert_eq!(bus.subscriber_count(tenant), 1);
    }

    #[test]
    fn concurrent_resubscribes_leave_one_slot() {
        let bus = BroadcastBus::new();
        let session = SessionId::new();
        let tenants = [TenantId::new(), TenantId::new()];

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let bus = bus.clone();
                let tenant = tenants[i % 2];
                std::thread::spawn(move || bus.subscribe(session, tenant))
            })
            .collect();
        let subscriptions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(bus.session_count(), 1);
        let slots: usize = tenants.iter().map(|t| bus.subscriber_count(*t)).sum();
        assert_eq!(slots, 1);
        let delivered: usize = tenants.iter().map(|t| bus.publish(&deleted(*t))).sum();
        assert_eq!(delivered, 1);

        drop(subscriptions);
        assert_eq!(bus.session_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_misses_events_until_resubscribe() {
        let bus = BroadcastBus::new();
        let tenant = TenantId::new();
        let session = SessionId::new();

        let mut sub = bus.subscribe(session, tenant);
        assert!(bus.disconnect_session(session));
        assert_eq!(bus.publish(&deleted(tenant)), 0);
        assert_eq!(sub.next().await, None);

        let mut again = bus.subscribe(session, tenant);
        let event = deleted(tenant);
        bus.publish(&event);
        assert_eq!(again.next().await, Some(event));
    }

    #[tokio::test]
    async fn drop_unregisters() {
        let bus = BroadcastBus::new();
        let tenant = TenantId::new();
        {
            let _sub = bus.subscribe(SessionId::new(), tenant);
            assert_eq!(bus.subscriber_count(tenant), 1);
        }
        assert_eq!(bus.subscriber_count(tenant), 0);
        assert_eq!(bus.session_count(), 0);
    }

    #[tokio::test]
    async fn close_keeps_queued_events() {
        let bus = BroadcastBus::new();
        let tenant = TenantId::new();
        let mut sub = bus.subscribe(SessionId::new(), tenant);

        let event = deleted(tenant);
        bus.publish(&event);
        sub.close();

        assert_eq!(bus.publish(&deleted(tenant)), 0);
        assert_eq!(sub.next().await, Some(event));
        assert_eq!(sub.next().await, None);
    }
}
