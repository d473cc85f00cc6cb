// file: src/dispatch.rs
// description: listener registry that fans decoded events out to subscribers

use crate::{
    error::PantheonError,
    types::{EventType, WebSocketEvent},
};
use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};
use tracing::{error, trace};

pub type Listener = Arc<dyn Fn(&WebSocketEvent) + Send + Sync>;

/// What a listener is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every event, including ones with an unrecognised type.
    All,
    Event(EventType),
}

impl From<EventType> for Topic {
    fn from(kind: EventType) -> Self {
        Topic::Event(kind)
    }
}

impl FromStr for Topic {
    type Err = PantheonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" | "*" => Ok(Topic::All),
            other => other.parse().map(Topic::Event),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::All => f.write_str("all"),
            Topic::Event(kind) => write!(f, "{}", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Buckets {
    next_id: u64,
    listeners: HashMap<Topic, Vec<(ListenerId, Listener)>>,
}

fn lock(buckets: &Mutex<Buckets>) -> MutexGuard<'_, Buckets> {
    buckets.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub panicked: usize,
}

#[derive(Clone, Default)]
pub struct EventRegistry {
    buckets: Arc<Mutex<Buckets>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&WebSocketEvent) + Send + Sync + 'static,
    {
        let mut buckets = lock(&self.buckets);
        buckets.next_id += 1;
        let id = ListenerId(buckets.next_id);
        buckets
            .listeners
            .entry(topic)
            .or_default()
            .push((id, Arc::new(callback)));
        trace!(%topic, ?id, "listener registered");

        Subscription {
            buckets: Arc::downgrade(&self.buckets),
            topic,
            id,
        }
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        lock(&self.buckets)
            .listeners
            .get(&topic)
            .map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        lock(&self.buckets).listeners.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.buckets).listeners.clear();
    }

    // Wildcard listeners first, then the event's own bucket, each in
    // registration order. Copied out so callbacks run without the lock held.
    fn snapshot(&self, event: &WebSocketEvent) -> Vec<Listener> {
        let buckets = lock(&self.buckets);
        let wildcard = buckets.listeners.get(&Topic::All).into_iter().flatten();
        let specific = event
            .event_type()
            .and_then(|kind| buckets.listeners.get(&Topic::Event(kind)))
            .into_iter()
            .flatten();

        wildcard
            .chain(specific)
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Runs every matching listener once. A panicking listener is logged and
    /// skipped; the rest still run.
    pub fn dispatch(&self, event: &WebSocketEvent) -> DispatchReport {
        let listeners = self.snapshot(event);
        let mut report = DispatchReport::default();

        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    report.panicked += 1;
                    error!(
                        event_type = event.event.type_name(),
                        "Listener panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle for a registered listener. Dropping it leaves the listener in
/// place; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    buckets: Weak<Mutex<Buckets>>,
    topic: Topic,
    id: ListenerId,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener. Safe to call from inside the listener itself and
    /// more than once; returns whether anything was removed.
    pub fn unsubscribe(&self) -> bool {
        let Some(buckets) = self.buckets.upgrade() else {
            return false;
        };
        let mut buckets = lock(&buckets);
        let Some(bucket) = buckets.listeners.get_mut(&self.topic) else {
            return false;
        };

        let before = bucket.len();
        bucket.retain(|(id, _)| *id != self.id);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            buckets.listeners.remove(&self.topic);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(type_name: &str, payload: serde_json::Value) -> WebSocketEvent {
        WebSocketEvent {
            event: Event::from_parts(type_name, payload).unwrap(),
            timestamp: None,
            received_at: Utc::now(),
        }
    }

    fn task_changed() -> WebSocketEvent {
        event("task_status_changed", json!({"task_id": "t1", "status": "running"}))
    }

    fn execution_failed() -> WebSocketEvent {
        event("agent_execution_failed", json!({"agent_type": "coder", "error": "boom"}))
    }

    fn counter(registry: &EventRegistry, topic: Topic) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = registry.register(topic, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn wildcard_sees_everything_specific_sees_its_type() {
        let registry = EventRegistry::new();
        let (all, _a) = counter(&registry, Topic::All);
        let (failed, _f) = counter(&registry, EventType::AgentExecutionFailed.into());

        registry.dispatch(&task_changed());
        registry.dispatch(&execution_failed());

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_events_reach_wildcard_only() {
        let registry = EventRegistry::new();
        let (all, _a) = counter(&registry, Topic::All);
        let (task, _t) = counter(&registry, EventType::TaskStatusChanged.into());

        let report = registry.dispatch(&event("build_started", json!({})));

        assert_eq!(report.delivered, 1);
        assert_eq!(all.load(Ordering::SeqCst), 1);
        assert_eq!(task.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wildcard_runs_before_specific_in_registration_order() {
        let registry = EventRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, topic) in [
            ("task-1", Topic::Event(EventType::TaskStatusChanged)),
            ("all-1", Topic::All),
            ("task-2", Topic::Event(EventType::TaskStatusChanged)),
            ("all-2", Topic::All),
        ] {
            let order = Arc::clone(&order);
            let _ = registry.register(topic, move |_| order.lock().unwrap().push(label));
        }

        registry.dispatch(&task_changed());
        assert_eq!(*order.lock().unwrap(), vec!["all-1", "all-2", "task-1", "task-2"]);
    }

    #[test]
    fn multiple_subscriptions_to_same_type_are_independent() {
        let registry = EventRegistry::new();
        let (first, first_sub) = counter(&registry, EventType::TaskStatusChanged.into());
        let (second, _second_sub) = counter(&registry, EventType::TaskStatusChanged.into());

        registry.dispatch(&task_changed());
        assert!(first_sub.unsubscribe());
        registry.dispatch(&task_changed());

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
        assert_eq!(registry.listener_count(EventType::TaskStatusChanged.into()), 1);
    }

    #[test]
    fn unsubscribing_inside_callback_keeps_current_pass_intact() {
        let registry = EventRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let self_calls = Arc::new(AtomicUsize::new(0));

        let handle = {
            let slot = Arc::clone(&slot);
            let self_calls = Arc::clone(&self_calls);
            registry.register(Topic::All, move |_| {
                self_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot.lock().unwrap().take() {
                    assert!(sub.unsubscribe());
                }
            })
        };
        *slot.lock().unwrap() = Some(handle);
        let (other, _o) = counter(&registry, Topic::All);

        let report = registry.dispatch(&task_changed());
        assert_eq!(report.delivered, 2);
        assert_eq!(other.load(Ordering::SeqCst), 1);

        registry.dispatch(&task_changed());
        assert_eq!(self_calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let registry = EventRegistry::new();
        let _bad = registry.register(Topic::All, |_| panic!("listener bug"));
        let (good, _g) = counter(&registry, Topic::All);

        let report = registry.dispatch(&task_changed());

        assert_eq!(report, DispatchReport { delivered: 1, panicked: 1 });
        assert_eq!(good.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_survives_registry_drop() {
        let registry = EventRegistry::new();
        let (_, sub) = counter(&registry, Topic::All);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(registry.is_empty());

        let (_, orphan) = counter(&registry, Topic::All);
        drop(registry);
        assert!(!orphan.unsubscribe());
    }

    #[test]
    fn topic_parses_wildcard_and_event_names() {
        assert_eq!("all".parse::<Topic>().unwrap(), Topic::All);
        assert_eq!(
            "agent_status_changed".parse::<Topic>().unwrap(),
            Topic::Event(EventType::AgentStatusChanged)
        );
        assert!("everything".parse::<Topic>().is_err());
    }
}
