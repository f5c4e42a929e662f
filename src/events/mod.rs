//! Event fan-out for new probe records and detected anomalies.
//!
//! Handlers run synchronously inside `publish`, in registration order. A
//! handler that panics is logged and skipped; the rest still receive the
//! event. Handlers must not block: anything slow belongs behind a channel
//! (see [`LiveRelay`]).

mod relay;

pub use relay::*;

use crate::analyzer::AnomalyEvent;
use crate::db::ProbeRecord;

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Record,
    Anomaly,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Anomaly => "anomaly",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Event {
    Record(ProbeRecord),
    Anomaly(AnomalyEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Self::Record(_) => Topic::Record,
            Self::Anomaly(_) => Topic::Anomaly,
        }
    }
}

/// Where producers hand their events.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: Event);
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: Topic,
    id: u64,
}

/// In-process broadcaster with one subscriber list per topic.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(Subscription, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let sub = Subscription {
            topic,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        match self.subscribers.write() {
            Ok(mut subs) => subs.push((sub, Arc::new(handler))),
            Err(poisoned) => poisoned.into_inner().push((sub, Arc::new(handler))),
        }
        sub
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, sub: Subscription) -> bool {
        let mut subs = match self.subscribers.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subs.len();
        subs.retain(|(s, _)| *s != sub);
        subs.len() != before
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.handlers(topic).len()
    }

    fn handlers(&self, topic: Topic) -> Vec<Handler> {
        let subs = match self.subscribers.read() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.iter()
            .filter(|(s, _)| s.topic == topic)
            .map(|(_, h)| h.clone())
            .collect()
    }
}

impl Publisher for EventBus {
    fn publish(&self, event: Event) {
        let topic = event.topic();
        // Snapshot so handlers may (un)subscribe without deadlocking.
        for handler in self.handlers(topic) {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::warn!("EventBus: subscriber panicked on {} event", topic.as_str());
            }
        }
    }
}
