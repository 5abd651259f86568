//! Topic-scoped publish/subscribe registry.
//!
//! The bus maps each [`Topic`] to the set of [`Channel`]s subscribed to it.
//! `publish` pushes the event into every matching channel; each channel keeps
//! per-subscriber FIFO order. There is no global instance: the composition
//! root constructs one bus, wraps it in an `Arc`, and hands it to every
//! publisher and live query. Tests build their own.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelId};
use crate::events::Event;
use crate::topic::{Topic, TopicPayload};

/// Channel type the bus delivers into.
pub type EventChannel<P> = Channel<Event<P>>;

type Registry<P> = HashMap<Topic, HashMap<ChannelId, Arc<EventChannel<P>>>>;

/// Point-in-time bus statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Active (topic, channel) registrations.
    pub subscriptions: usize,
    /// Publish calls accepted (including ones with no subscribers).
    pub published: u64,
    /// Individual channel deliveries.
    pub delivered: u64,
    /// Registrations removed because their channel had closed.
    pub pruned: u64,
}

/// Publish/subscribe bus for one payload catalog `P`.
pub struct EventBus<P> {
    registry: RwLock<Registry<P>>,
    published: AtomicU64,
    delivered: AtomicU64,
    pruned: AtomicU64,
}

impl<P: TopicPayload> EventBus<P> {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<P>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<P>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `channel` for every future publish on `topic`.
    ///
    /// Idempotent per (topic, channel). Returns `true` if the registration is
    /// new. Closed channels are never registered.
    pub fn subscribe(&self, topic: &Topic, channel: &Arc<EventChannel<P>>) -> bool {
        if channel.is_closed() {
            debug!(topic = %topic, channel_id = %channel.id(), "Ignoring subscribe of closed channel");
            return false;
        }

        let mut registry = self.write();
        let subscribers = registry.entry(topic.clone()).or_default();
        if subscribers.contains_key(&channel.id()) {
            return false;
        }
        subscribers.insert(channel.id(), channel.clone());
        trace!(
            topic = %topic,
            channel_id = %channel.id(),
            subscriber_count = subscribers.len(),
            "EventBus subscribe"
        );
        true
    }

    /// Remove the (topic, channel) registration.
    ///
    /// Unknown pairs are a no-op. Returns `true` if a registration was removed.
    pub fn unsubscribe(&self, topic: &Topic, channel: &EventChannel<P>) -> bool {
        let mut registry = self.write();
        let Some(subscribers) = registry.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(&channel.id()).is_some();
        if subscribers.is_empty() {
            registry.remove(topic);
        }
        if removed {
            trace!(topic = %topic, channel_id = %channel.id(), "EventBus unsubscribe");
        }
        removed
    }

    /// Remove `channel` from every topic. Returns the number of registrations removed.
    pub fn unsubscribe_all(&self, channel: &EventChannel<P>) -> usize {
        let mut registry = self.write();
        let mut removed = 0;
        registry.retain(|_, subscribers| {
            if subscribers.remove(&channel.id()).is_some() {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        removed
    }

    /// Publish `payload` on `topic`. Returns the number of channels it reached.
    ///
    /// Zero subscribers is a silent no-op. Publishing on the reserved restart
    /// topic, or on a topic whose kind differs from `payload.kind()`, is
    /// rejected and returns 0.
    pub fn publish(&self, topic: &Topic, payload: P) -> usize {
        if topic.is_restart() {
            warn!(topic = %topic, "Rejected domain publish on restart topic; use publish_restart");
            return 0;
        }
        if topic.kind() != payload.kind() {
            warn!(
                topic = %topic,
                payload_kind = payload.kind(),
                "Rejected publish: payload kind does not match topic"
            );
            return 0;
        }
        self.deliver(Event::domain(topic.clone(), payload))
    }

    /// Publish `payload` on the topic derived from its own kind within `scope`.
    ///
    /// Goes through [`EventBus::publish`], so a payload reporting the reserved
    /// restart kind is rejected here too.
    pub fn emit(&self, scope: &str, payload: P) -> usize {
        let topic = Topic::for_payload(&payload, scope);
        self.publish(&topic, payload)
    }

    /// Force every live query watching `scope` to reload its snapshot.
    pub fn publish_restart(&self, scope: &str) -> usize {
        debug!(scope, "EventBus restart");
        self.deliver(Event::restart(scope))
    }

    fn deliver(&self, event: Event<P>) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        // Snapshot the subscriber set so no registry lock is held while pushing.
        let subscribers: Vec<Arc<EventChannel<P>>> = match self.read().get(&event.topic) {
            Some(subscribers) => subscribers.values().cloned().collect(),
            None => Vec::new(),
        };
        if subscribers.is_empty() {
            trace!(topic = %event.topic, "EventBus publish with no subscribers");
            return 0;
        }

        let mut delivered = 0;
        let mut closed = Vec::new();
        for channel in &subscribers {
            if channel.push(event.clone()) {
                delivered += 1;
            } else {
                closed.push(channel.id());
            }
        }
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);

        if !closed.is_empty() {
            self.prune(&event.topic, &closed);
        }

        debug!(
            topic = %event.topic,
            event_id = %event.id,
            subscriber_count = subscribers.len(),
            delivered,
            "EventBus publish"
        );
        delivered
    }

    fn prune(&self, topic: &Topic, closed: &[ChannelId]) {
        let mut registry = self.write();
        let Some(subscribers) = registry.get_mut(topic) else {
            return;
        };
        let mut pruned = 0;
        for id in closed {
            if subscribers.remove(id).is_some() {
                pruned += 1;
            }
        }
        if subscribers.is_empty() {
            registry.remove(topic);
        }
        if pruned > 0 {
            self.pruned.fetch_add(pruned, Ordering::Relaxed);
            debug!(topic = %topic, pruned, "Pruned closed channels from topic");
        }
    }

    /// Number of channels subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.read().get(topic).map_or(0, HashMap::len)
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.read().len()
    }

    /// Total (topic, channel) registrations.
    pub fn subscription_count(&self) -> usize {
        self.read().values().map(HashMap::len).sum()
    }

    pub fn stats(&self) -> BusStats {
        let registry = self.read();
        BusStats {
            topics: registry.len(),
            subscriptions: registry.values().map(HashMap::len).sum(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
        }
    }
}

impl<P: TopicPayload> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: TopicPayload> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").field("stats", &self.stats()).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
