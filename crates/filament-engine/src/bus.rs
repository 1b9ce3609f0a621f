//! Event bus for publish/subscribe between engine components and the host
//!
//! Handlers are registered under an opaque [`OwnerToken`] so that all
//! subscriptions held by one owner can be removed in a single call when
//! that owner goes away.
//!
//! ## Rules
//! - **Synchronous delivery**: `publish()` invokes handlers inline, in
//!   subscription order.
//! - **Snapshot iteration**: publish iterates a snapshot of the handler
//!   list, so handlers may subscribe/unsubscribe reentrantly.
//! - **No post-unsubscribe delivery**: a handler is never invoked after
//!   its owning token has been unsubscribed, even when the unsubscribe
//!   happens from inside another handler mid-publish.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Opaque token identifying the owner of a group of subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    /// Create a fresh token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler invoked with the published payload
pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

struct Subscription {
    id: u64,
    token: OwnerToken,
    handler: EventHandler,
}

#[derive(Default)]
struct BusInner {
    topics: HashMap<String, Vec<Subscription>>,
    /// (topic, subscription id) pairs per token, for O(k) bulk removal
    by_token: HashMap<OwnerToken, Vec<(String, u64)>>,
    /// Subscription ids that have not been unsubscribed
    live: HashSet<u64>,
    next_id: u64,
}

/// Synchronous topic-based publish/subscribe
///
/// The subscription table sits behind a mutex that is released before
/// any handler runs, so handlers may call back into the bus during a
/// publish. Delivery itself is serialized by the caller per the
/// engine's single-logical-thread model.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic under the given owner token
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&serde_json::Value) + Send + Sync + 'static,
        token: OwnerToken,
    ) {
        let topic = topic.into();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.live.insert(id);
        inner
            .by_token
            .entry(token)
            .or_default()
            .push((topic.clone(), id));
        inner.topics.entry(topic).or_default().push(Subscription {
            id,
            token,
            handler: Arc::new(handler),
        });
    }

    /// Publish a payload to every handler subscribed to `topic`
    ///
    /// Handlers run synchronously in subscription order. Handlers
    /// subscribed during this publish are not invoked until the next
    /// publish; handlers unsubscribed during this publish are skipped.
    pub fn publish(&self, topic: &str, payload: &serde_json::Value) {
        let snapshot: Vec<(u64, EventHandler)> = {
            let mut inner = self.inner.lock().unwrap();
            // Prune entries whose token was bulk-unsubscribed earlier;
            // keeps unsubscribe_all O(token's subscriptions).
            let live = std::mem::take(&mut inner.live);
            let subs = match inner.topics.get_mut(topic) {
                Some(subs) => {
                    subs.retain(|s| live.contains(&s.id));
                    subs.iter()
                        .map(|s| (s.id, Arc::clone(&s.handler)))
                        .collect()
                }
                None => Vec::new(),
            };
            inner.live = live;
            subs
        };

        for (id, handler) in snapshot {
            // Re-check liveness: an earlier handler in this publish may
            // have unsubscribed this one.
            let alive = self.inner.lock().unwrap().live.contains(&id);
            if alive {
                handler(payload);
            }
        }
    }

    /// Remove every subscription registered under `token`, on any topic
    pub fn unsubscribe_all(&self, token: OwnerToken) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entries) = inner.by_token.remove(&token) else {
            return;
        };
        for (_, id) in &entries {
            inner.live.remove(id);
        }
        // Dead entries are pruned from topic lists lazily on publish.
    }

    /// Remove every handler subscribed to one topic
    pub fn unsubscribe_topic(&self, topic: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Some(subs) = inner.topics.remove(topic) else {
            return;
        };
        for sub in &subs {
            inner.live.remove(&sub.id);
            if let Some(entries) = inner.by_token.get_mut(&sub.token) {
                entries.retain(|(_, id)| *id != sub.id);
            }
        }
    }

    /// Number of live subscriptions across all topics
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> EventHandler) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let seen = Arc::clone(&seen);
            move |tag: &str| -> EventHandler {
                let seen = Arc::clone(&seen);
                let tag = tag.to_string();
                Arc::new(move |_payload: &serde_json::Value| {
                    seen.lock().unwrap().push(tag.clone());
                })
            }
        };
        (seen, make)
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let bus = EventBus::new();
        let token = OwnerToken::new();
        let (seen, make) = collector();

        let first = make("first");
        let second = make("second");
        bus.subscribe("tick", move |p| first(p), token);
        bus.subscribe("tick", move |p| second(p), token);

        bus.publish("tick", &serde_json::Value::Null);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsubscribe_all_removes_every_topic() {
        let bus = EventBus::new();
        let token = OwnerToken::new();
        let (seen, make) = collector();

        let a = make("a");
        let b = make("b");
        bus.subscribe("tick", move |p| a(p), token);
        bus.subscribe("tock", move |p| b(p), token);
        assert_eq!(bus.subscription_count(), 2);

        bus.unsubscribe_all(token);
        assert_eq!(bus.subscription_count(), 0);

        bus.publish("tick", &serde_json::Value::Null);
        bus.publish("tock", &serde_json::Value::Null);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe_topic() {
        let bus = EventBus::new();
        let token = OwnerToken::new();
        let (seen, make) = collector();

        let a = make("a");
        let b = make("b");
        bus.subscribe("tick", move |p| a(p), token);
        bus.subscribe("tock", move |p| b(p), token);

        bus.unsubscribe_topic("tick");
        bus.publish("tick", &serde_json::Value::Null);
        bus.publish("tock", &serde_json::Value::Null);
        assert_eq!(*seen.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_reentrant_unsubscribe_during_publish() {
        // A handler that unsubscribes a *different* token mid-publish
        // must suppress that token's not-yet-invoked handlers without
        // affecting its own token's delivery.
        let bus = Arc::new(EventBus::new());
        let killer_token = OwnerToken::new();
        let victim_token = OwnerToken::new();
        let (seen, make) = collector();

        let killer_tag = make("killer");
        let bus_ref = Arc::clone(&bus);
        bus.subscribe(
            "tick",
            move |p| {
                killer_tag(p);
                bus_ref.unsubscribe_all(victim_token);
            },
            killer_token,
        );
        let victim = make("victim");
        bus.subscribe("tick", move |p| victim(p), victim_token);
        let survivor = make("survivor");
        bus.subscribe("tick", move |p| survivor(p), killer_token);

        bus.publish("tick", &serde_json::Value::Null);
        assert_eq!(*seen.lock().unwrap(), vec!["killer", "survivor"]);
    }

    #[test]
    fn test_subscribe_during_publish_deferred() {
        let bus = Arc::new(EventBus::new());
        let token = OwnerToken::new();
        let (seen, make) = collector();

        let outer = make("outer");
        let late = make("late");
        let bus_ref = Arc::clone(&bus);
        bus.subscribe(
            "tick",
            move |p| {
                outer(p);
                let late = late.clone();
                bus_ref.subscribe("tick", move |p| late(p), token);
            },
            token,
        );

        bus.publish("tick", &serde_json::Value::Null);
        // Snapshot excludes the handler added mid-publish
        assert_eq!(*seen.lock().unwrap(), vec!["outer"]);

        bus.publish("tick", &serde_json::Value::Null);
        assert!(seen.lock().unwrap().len() >= 3);
    }
}
