//! Anomaly analyzer: periodic statistical checks over recent probe records.

mod checks;
mod models;
mod stats;

pub use checks::*;
pub use models::*;
pub use stats::*;

use crate::db::{DbError, Store};
use crate::events::{Event, Publisher};
use crate::scheduler::PeriodicTask;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Records older than this are not analyzed.
pub const ANALYSIS_WINDOW_MINUTES: i64 = 24 * 60;
/// Window behind the on-demand snapshot.
pub const SNAPSHOT_WINDOW_MINUTES: i64 = 60;

pub struct AnomalyAnalyzer {
    store: Arc<Store>,
    publisher: Arc<dyn Publisher>,
    thresholds: Thresholds,
    task: PeriodicTask,
}

impl AnomalyAnalyzer {
    pub fn new(
        store: Arc<Store>,
        publisher: Arc<dyn Publisher>,
        thresholds: Thresholds,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            thresholds,
            task: PeriodicTask::new("Analyzer", interval),
        }
    }

    /// Analyze now, then every interval. No-op if already running.
    pub async fn start(self: &Arc<Self>) {
        let this = self.clone();
        let started = self
            .task
            .start(move || {
                let this = this.clone();
                async move {
                    this.analyze();
                }
            })
            .await;

        if started {
            tracing::info!(
                "Analyzer: running every {:?} (z > {}, latency > {}ms)",
                self.task.period(),
                self.thresholds.zscore,
                self.thresholds.latency_ms
            );
        }
    }

    pub async fn stop(&self) {
        if self.task.stop().await {
            tracing::info!("Analyzer: stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.is_running().await
    }

    /// Run one analysis cycle and publish each anomaly found.
    ///
    /// Never fails: store errors are logged and end the cycle. Returns the
    /// number of anomalies published.
    pub fn analyze(&self) -> usize {
        let records = match self.store.recent(ANALYSIS_WINDOW_MINUTES) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Analyzer: Failed to load records: {}", e);
                return 0;
            }
        };

        if records.len() < MIN_SAMPLES {
            tracing::debug!(
                "Analyzer: {} records in window, need {}; skipping",
                records.len(),
                MIN_SAMPLES
            );
            return 0;
        }

        let anomalies = detect_anomalies(&records, &self.thresholds, Utc::now());
        let count = anomalies.len();

        for anomaly in anomalies {
            tracing::warn!(
                "Analyzer: {} anomaly ({}): {}",
                anomaly.kind,
                anomaly.severity,
                anomaly.message
            );
            self.publisher.publish(Event::Anomaly(anomaly));
        }

        tracing::debug!("Analyzer: analyzed {} records, {} anomalies", records.len(), count);
        count
    }

    /// Statistics over the last hour, without any threshold comparison.
    pub fn current_snapshot(&self) -> Result<AnomalySnapshot, DbError> {
        let records = self.store.recent(SNAPSHOT_WINDOW_MINUTES)?;
        Ok(AnomalySnapshot::from_records(&records, SNAPSHOT_WINDOW_MINUTES))
    }
}
