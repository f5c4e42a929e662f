//! Scheduler module for running probes against the target endpoint.

mod periodic;
mod record;

pub use periodic::*;
pub use record::*;

use crate::db::{ProbeRecord, RequestType, Store};
use crate::events::{Event, Publisher};
use crate::probe::{generate_payload, ProbeOutcome, ProbeRequest, ProbeTransport};

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What to probe and how often.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub target_url: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Probes the target on a timer and on demand, storing and publishing
/// every outcome.
pub struct ProbeScheduler {
    store: Arc<Store>,
    publisher: Arc<dyn Publisher>,
    transport: Arc<dyn ProbeTransport>,
    settings: ProbeSettings,
    task: PeriodicTask,
}

impl ProbeScheduler {
    pub fn new(
        store: Arc<Store>,
        publisher: Arc<dyn Publisher>,
        transport: Arc<dyn ProbeTransport>,
        settings: ProbeSettings,
    ) -> Self {
        let task = PeriodicTask::new("Scheduler", settings.interval);
        Self {
            store,
            publisher,
            transport,
            settings,
            task,
        }
    }

    /// Probe now, then every interval. No-op if already running.
    pub async fn start(self: &Arc<Self>) {
        let this = self.clone();
        let started = self
            .task
            .start(move || {
                let this = this.clone();
                async move {
                    this.probe_once(RequestType::Auto).await;
                }
            })
            .await;

        if started {
            tracing::info!(
                "Scheduler: probing {} every {:?}",
                self.settings.target_url,
                self.settings.interval
            );
        }
    }

    /// Disarm the timer. In-flight probes still finish and store their record.
    pub async fn stop(&self) {
        if self.task.stop().await {
            tracing::info!("Scheduler: stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.is_running().await
    }

    /// Run exactly one probe and wait for it.
    ///
    /// Returns the stored record, or `None` if it could not be stored (the
    /// failure is logged, never raised).
    pub async fn probe_once(&self, request_type: RequestType) -> Option<ProbeRecord> {
        let request = ProbeRequest {
            url: self.settings.target_url.clone(),
            body: generate_payload().to_string(),
            timeout: self.settings.timeout,
        };

        let started = Instant::now();
        let outcome = self.transport.send(&request).await;
        let elapsed = started.elapsed();

        match &outcome {
            ProbeOutcome::Success(resp) => tracing::debug!(
                "Scheduler: {} probe -> {} in {}ms",
                request_type.as_str(),
                resp.status,
                elapsed.as_millis()
            ),
            ProbeOutcome::HttpError { status, .. } => tracing::warn!(
                "Scheduler: {} probe -> HTTP {} in {}ms",
                request_type.as_str(),
                status,
                elapsed.as_millis()
            ),
            ProbeOutcome::NetworkFailure { message, .. } => tracing::warn!(
                "Scheduler: {} probe failed after {}ms: {}",
                request_type.as_str(),
                elapsed.as_millis(),
                message
            ),
        }

        let record = build_record(&request, outcome, elapsed, request_type, Utc::now());

        match self.store.insert(&record) {
            Ok(id) => {
                let stored = record.with_id(id);
                self.publisher.publish(Event::Record(stored.clone()));
                Some(stored)
            }
            Err(e) => {
                tracing::error!("Scheduler: Failed to store probe record: {}", e);
                None
            }
        }
    }
}
