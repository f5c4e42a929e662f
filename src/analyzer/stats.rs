//! Rolling statistics over response-time samples.

use crate::db::ProbeRecord;

use serde::Serialize;
use tdigests::TDigest;

/// Summary of a finite sample set. Standard deviation is the population one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl RollingStats {
    /// All zeros for an empty slice.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let count = samples.len();
        let mean = samples.iter().sum::<f64>() / count as f64;
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
            count,
        }
    }

    pub fn from_records(records: &[ProbeRecord]) -> Self {
        Self::from_samples(&response_times(records))
    }

    /// Distance from the mean in standard deviations, `None` if the spread is zero.
    pub fn zscore(&self, value: f64) -> Option<f64> {
        if self.std_dev > 0.0 {
            Some((value - self.mean).abs() / self.std_dev)
        } else {
            None
        }
    }
}

pub(crate) fn response_times(records: &[ProbeRecord]) -> Vec<f64> {
    records.iter().map(|r| r.response_time_ms as f64).collect()
}

/// Percentage of records with an HTTP error status, 0 for an empty slice.
pub(crate) fn error_rate_percent(records: &[ProbeRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let errors = records.iter().filter(|r| r.is_error()).count();
    errors as f64 * 100.0 / records.len() as f64
}

/// Response-time percentiles estimated with a t-digest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    pub fn estimate(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut td = TDigest::from_values(samples.to_vec());
        td.compress(100);

        Some(Self {
            p50: sanitize_float(td.estimate_quantile(0.50)),
            p95: sanitize_float(td.estimate_quantile(0.95)),
            p99: sanitize_float(td.estimate_quantile(0.99)),
        })
    }
}

fn sanitize_float(f: f64) -> f64 {
    if f.is_nan() || f.is_infinite() {
        0.0
    } else {
        f
    }
}

/// Read-only view of the last hour, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalySnapshot {
    pub window_minutes: i64,
    pub stats: RollingStats,
    pub error_rate_percent: f64,
    pub total_requests: usize,
    pub percentiles: Option<Percentiles>,
}

impl AnomalySnapshot {
    pub fn from_records(records: &[ProbeRecord], window_minutes: i64) -> Self {
        let samples = response_times(records);
        Self {
            window_minutes,
            stats: RollingStats::from_samples(&samples),
            error_rate_percent: (error_rate_percent(records) * 100.0).round() / 100.0,
            total_requests: records.len(),
            percentiles: Percentiles::estimate(&samples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RequestType;
    use chrono::Utc;

    fn rec(status_code: u16, response_time_ms: u64) -> ProbeRecord {
        ProbeRecord {
            id: 0,
            timestamp: Utc::now(),
            request_payload: String::new(),
            response_data: String::new(),
            status_code,
            response_time_ms,
            content_type: None,
            content_length: None,
            request_type: RequestType::Auto,
        }
    }

    #[test]
    fn test_rolling_stats() {
        let stats = RollingStats::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count, 8);
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!((stats.std_dev - 2.0).abs() < 1e-9);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert!((stats.zscore(9.0).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_and_flat_samples() {
        assert_eq!(RollingStats::from_samples(&[]), RollingStats::default());

        let flat = RollingStats::from_samples(&[100.0; 5]);
        assert_eq!(flat.std_dev, 0.0);
        assert!(flat.zscore(100.0).is_none());
    }

    #[test]
    fn test_snapshot() {
        let records = vec![rec(200, 100), rec(500, 300), rec(200, 200), rec(0, 400)];
        let snap = AnomalySnapshot::from_records(&records, 60);

        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.error_rate_percent, 25.0);
        assert!((snap.stats.mean - 250.0).abs() < 1e-9);
        let p = snap.percentiles.unwrap();
        assert!(p.p50 >= 100.0 && p.p50 <= 400.0);
        assert!(p.p99 >= p.p50);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = AnomalySnapshot::from_records(&[], 60);
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.error_rate_percent, 0.0);
        assert!(snap.percentiles.is_none());
    }
}
