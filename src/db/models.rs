//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a probe was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Manual,
    #[default]
    Auto,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }

    /// Unknown values map to `Auto`, the column default.
    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => Self::Manual,
            _ => Self::Auto,
        }
    }
}

/// One stored probe outcome.
///
/// `status_code` is `0` when no HTTP response was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub request_payload: String,
    pub response_data: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub request_type: RequestType,
}

impl ProbeRecord {
    /// HTTP errors only; a `0` (no response) is not counted here.
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

/// A probe outcome that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProbeRecord {
    pub timestamp: DateTime<Utc>,
    pub request_payload: String,
    pub response_data: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub request_type: RequestType,
}

impl NewProbeRecord {
    pub fn with_id(self, id: i64) -> ProbeRecord {
        ProbeRecord {
            id,
            timestamp: self.timestamp,
            request_payload: self.request_payload,
            response_data: self.response_data,
            status_code: self.status_code,
            response_time_ms: self.response_time_ms,
            content_type: self.content_type,
            content_length: self.content_length,
            request_type: self.request_type,
        }
    }
}

/// Filter for listing records. All set fields are ANDed; bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub status_code: Option<u16>,
    pub min_response_time_ms: Option<u64>,
    pub max_response_time_ms: Option<u64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// One page of records plus the unpaginated match count.
#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub records: Vec<ProbeRecord>,
    pub total: u64,
}

/// Aggregate statistics over a trailing window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_requests: u64,
    pub average_response_time_ms: u64,
    pub success_rate_percent: u64,
    pub status_code_distribution: BTreeMap<u16, u64>,
}
