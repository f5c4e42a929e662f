//! HTTP request handlers.

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::analyzer::{AnomalyEvent, AnomalySnapshot};
use crate::db::{ProbeRecord, RecordFilter, RequestType, Statistics};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 1000;
pub const DEFAULT_RECENT_MINUTES: i64 = 60;
pub const DEFAULT_STATS_HOURS: i64 = 24;
const MAX_WINDOW_MINUTES: i64 = 60 * 24 * 366;

// ============================================================================
// API: Records
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status_code: Option<i64>,
    pub min_response_time: Option<i64>,
    pub max_response_time: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl RecordsQuery {
    /// Check ranges and turn the raw parameters into store arguments.
    pub fn validate(&self) -> ApiResult<(u32, u64, RecordFilter)> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ApiError::InvalidQuery(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }

        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ApiError::InvalidQuery("offset must not be negative".to_string()));
        }

        let status_code = match self.status_code {
            None => None,
            Some(code) if code == 0 || (100..=599).contains(&code) => Some(code as u16),
            Some(code) => {
                return Err(ApiError::InvalidQuery(format!("invalid statusCode {}", code)))
            }
        };

        let filter = RecordFilter {
            status_code,
            min_response_time_ms: non_negative("minResponseTime", self.min_response_time)?,
            max_response_time_ms: non_negative("maxResponseTime", self.max_response_time)?,
            start_time: parse_time("startTime", self.start_time.as_deref())?,
            end_time: parse_time("endTime", self.end_time.as_deref())?,
        };

        Ok((limit as u32, offset as u64, filter))
    }
}

fn non_negative(name: &str, value: Option<i64>) -> ApiResult<Option<u64>> {
    match value {
        None => Ok(None),
        Some(v) if v >= 0 => Ok(Some(v as u64)),
        Some(_) => Err(ApiError::InvalidQuery(format!("{} must not be negative", name))),
    }
}

fn parse_time(name: &str, value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| ApiError::InvalidQuery(format!("{} must be an RFC 3339 timestamp", name))),
    }
}

fn window(name: &str, value: Option<i64>, default: i64, max: i64) -> ApiResult<i64> {
    let v = value.unwrap_or(default);
    if (1..=max).contains(&v) {
        Ok(v)
    } else {
        Err(ApiError::InvalidQuery(format!("{} must be between 1 and {}", name, max)))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecordsResponse {
    pub records: Vec<ProbeRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
    pub has_more: bool,
}

pub async fn handle_list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> ApiResult<Json<ListRecordsResponse>> {
    let (limit, offset, filter) = query.validate()?;
    let page = state.store.query(limit, offset, &filter)?;

    Ok(Json(ListRecordsResponse {
        has_more: offset + u64::from(limit) < page.total,
        records: page.records,
        total: page.total,
        limit,
        offset,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub minutes: Option<i64>,
}

pub async fn handle_recent_records(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Vec<ProbeRecord>>> {
    let minutes = window("minutes", query.minutes, DEFAULT_RECENT_MINUTES, MAX_WINDOW_MINUTES)?;
    Ok(Json(state.store.recent(minutes)?))
}

// ============================================================================
// API: Statistics
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub hours: Option<i64>,
}

pub async fn handle_statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> ApiResult<Json<Statistics>> {
    let hours = window("hours", query.hours, DEFAULT_STATS_HOURS, MAX_WINDOW_MINUTES / 60)?;
    Ok(Json(state.store.statistics(hours)?))
}

// ============================================================================
// API: Probes & Anomalies
// ============================================================================

pub async fn handle_trigger_probe(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    match state.scheduler.probe_once(RequestType::Manual).await {
        Some(record) => Ok((StatusCode::CREATED, Json(record))),
        None => Err(ApiError::Internal("probe record could not be stored".to_string())),
    }
}

pub async fn handle_anomaly_snapshot(
    State(state): State<AppState>,
) -> ApiResult<Json<AnomalySnapshot>> {
    Ok(Json(state.analyzer.current_snapshot()?))
}

pub async fn handle_recent_anomalies(State(state): State<AppState>) -> Json<Vec<AnomalyEvent>> {
    Json(state.history.recent())
}

/// Stream record and anomaly events via SSE.
pub async fn handle_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.relay.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                let sse_event = SseEvent::default().event(event.topic().as_str()).data(json);
                Some((Ok(sse_event), rx))
            }
            Err(RecvError::Lagged(n)) => {
                // Client lagged behind, continue
                Some((Ok(SseEvent::default().comment(format!("lagged {}", n))), rx))
            }
            Err(RecvError::Closed) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let storage = state.store.is_open();
    let probing = state.scheduler.is_running().await;
    let analyzing = state.analyzer.is_running().await;
    let status = if storage {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if storage { "ok" } else { "degraded" },
            "storage": storage,
            "probing": probing,
            "analyzing": analyzing,
        })),
    )
}
