//! Downstream subscribers: live streaming and recent anomaly history.

use super::{Event, EventBus, Topic};
use crate::analyzer::AnomalyEvent;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Forwards bus events into a bounded broadcast channel for network clients.
///
/// Sending never blocks; a client that falls behind loses the oldest events.
#[derive(Clone)]
pub struct LiveRelay {
    tx: broadcast::Sender<Event>,
}

impl LiveRelay {
    pub fn attach(bus: &EventBus, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));

        for topic in [Topic::Record, Topic::Anomaly] {
            let tx = tx.clone();
            bus.subscribe(topic, move |event| {
                // No receivers is fine.
                let _ = tx.send(event.clone());
            });
        }

        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

/// Keeps the most recent anomalies in memory.
pub struct AnomalyHistory {
    capacity: usize,
    events: Mutex<VecDeque<AnomalyEvent>>,
}

impl AnomalyHistory {
    pub fn attach(bus: &EventBus, capacity: usize) -> Arc<Self> {
        let history = Arc::new(Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        });

        let sink = history.clone();
        bus.subscribe(Topic::Anomaly, move |event| {
            if let Event::Anomaly(anomaly) = event {
                sink.push(anomaly.clone());
            }
        });

        history
    }

    fn push(&self, anomaly: AnomalyEvent) {
        let mut events = match self.events.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.capacity == 0 {
            return;
        }
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(anomaly);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<AnomalyEvent> {
        let events = match self.events.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.iter().rev().cloned().collect()
    }
}
