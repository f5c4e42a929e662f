//! Anomaly event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which check produced an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnomalyKind {
    Latency,
    StatusCodeBurst,
    ErrorRateWindow,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latency => write!(f, "latency"),
            Self::StatusCodeBurst => write!(f, "statusCodeBurst"),
            Self::ErrorRateWindow => write!(f, "errorRateWindow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A detected deviation. Never stored by the core; it only travels as an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    /// Set only for latency anomalies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_record_id: Option<i64>,
}
