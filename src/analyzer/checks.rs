//! Rule-based anomaly checks over a window of records.
//!
//! Every check takes records newest first, the order the store returns them.

use super::models::{AnomalyEvent, AnomalyKind, Severity};
use super::stats::{error_rate_percent, RollingStats};
use crate::db::ProbeRecord;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Fewer records than this and the whole cycle is skipped.
pub const MIN_SAMPLES: usize = 10;

pub const BURST_WINDOW: usize = 20;
pub const BURST_MIN_ERRORS: usize = 3;
pub const BURST_THRESHOLD_PERCENT: f64 = 20.0;

pub const HOURLY_MIN_SAMPLES: usize = 5;
pub const HOURLY_THRESHOLD_PERCENT: f64 = 30.0;

/// Latency check thresholds; both must be exceeded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub zscore: f64,
    pub latency_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            zscore: 2.5,
            latency_ms: 5000.0,
        }
    }
}

/// Run every check. Returns nothing when there is not enough data.
pub fn detect_anomalies(
    records: &[ProbeRecord],
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> Vec<AnomalyEvent> {
    if records.len() < MIN_SAMPLES {
        return Vec::new();
    }

    let mut events = latency_anomalies(records, thresholds, now);
    events.extend(status_code_burst(records, now));
    events.extend(error_rate_windows(records, now));
    events
}

/// One event per record that is both statistically and absolutely slow.
pub fn latency_anomalies(
    records: &[ProbeRecord],
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> Vec<AnomalyEvent> {
    let stats = RollingStats::from_records(records);
    let limit = stats.mean + thresholds.zscore * stats.std_dev;

    records
        .iter()
        .filter_map(|r| {
            let value = r.response_time_ms as f64;
            let z = stats.zscore(value)?;
            if z <= thresholds.zscore || value <= thresholds.latency_ms {
                return None;
            }

            let severity = if z > 3.5 {
                Severity::High
            } else if z > 3.0 {
                Severity::Medium
            } else {
                Severity::Low
            };

            Some(AnomalyEvent {
                timestamp: now,
                kind: AnomalyKind::Latency,
                severity,
                value,
                threshold: limit,
                message: format!(
                    "Response time {}ms is {:.2} standard deviations above the mean of {:.0}ms",
                    r.response_time_ms, z, stats.mean
                ),
                related_record_id: Some(r.id),
            })
        })
        .collect()
}

/// Errors among the latest probes. The rate is always taken over the full
/// burst window, even when fewer records exist.
pub fn status_code_burst(records: &[ProbeRecord], now: DateTime<Utc>) -> Option<AnomalyEvent> {
    let errors = records
        .iter()
        .take(BURST_WINDOW)
        .filter(|r| r.is_error())
        .count();
    if errors < BURST_MIN_ERRORS {
        return None;
    }

    let rate = errors as f64 * 100.0 / BURST_WINDOW as f64;
    let severity = if rate >= 50.0 {
        Severity::High
    } else if rate >= 25.0 {
        Severity::Medium
    } else {
        Severity::Low
    };

    Some(AnomalyEvent {
        timestamp: now,
        kind: AnomalyKind::StatusCodeBurst,
        severity,
        value: rate,
        threshold: BURST_THRESHOLD_PERCENT,
        message: format!(
            "{} of the last {} probes returned an error status ({:.0}%)",
            errors, BURST_WINDOW, rate
        ),
        related_record_id: None,
    })
}

/// Calendar-hour buckets (UTC) whose error rate is too high.
pub fn error_rate_windows(records: &[ProbeRecord], now: DateTime<Utc>) -> Vec<AnomalyEvent> {
    let mut buckets: BTreeMap<String, Vec<ProbeRecord>> = BTreeMap::new();
    for r in records {
        buckets
            .entry(hour_bucket(&r.timestamp))
            .or_default()
            .push(r.clone());
    }

    buckets
        .into_iter()
        .filter(|(_, bucket)| bucket.len() >= HOURLY_MIN_SAMPLES)
        .filter_map(|(hour, bucket)| {
            let rate = error_rate_percent(&bucket);
            if rate <= HOURLY_THRESHOLD_PERCENT {
                return None;
            }

            let severity = if rate >= 50.0 {
                Severity::High
            } else {
                Severity::Medium
            };

            Some(AnomalyEvent {
                timestamp: now,
                kind: AnomalyKind::ErrorRateWindow,
                severity,
                value: rate,
                threshold: HOURLY_THRESHOLD_PERCENT,
                message: format!(
                    "Error rate {:.1}% over {} probes in hour {}",
                    rate,
                    bucket.len(),
                    hour
                ),
                related_record_id: None,
            })
        })
        .collect()
}

/// `YYYY-MM-DDTHH` truncation of a timestamp.
pub fn hour_bucket(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H").to_string()
}
