//! Turns a probe outcome into a storable record.

use crate::db::{NewProbeRecord, RequestType};
use crate::probe::{ProbeOutcome, ProbeRequest};

use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;

/// Build the record for one finished probe.
///
/// Failures still produce a record: `status_code` is `0` when no response
/// was obtained, and `response_data` holds a JSON error descriptor.
pub fn build_record(
    request: &ProbeRequest,
    outcome: ProbeOutcome,
    elapsed: Duration,
    request_type: RequestType,
    completed_at: DateTime<Utc>,
) -> NewProbeRecord {
    let response_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

    let (status_code, response_data, content_type, content_length) = match outcome {
        ProbeOutcome::Success(response) => {
            let data = normalize_body(&response.body);
            let len = data.len() as u64;
            (response.status, data, response.content_type, Some(len))
        }
        ProbeOutcome::HttpError {
            status,
            body,
            message,
        } => {
            let descriptor = error_descriptor(request, &message, None, Some(&body));
            (status, descriptor, Some("application/json".to_string()), Some(0))
        }
        ProbeOutcome::NetworkFailure { message, code } => {
            let descriptor = error_descriptor(request, &message, code.as_deref(), None);
            (0, descriptor, Some("application/json".to_string()), Some(0))
        }
    };

    NewProbeRecord {
        timestamp: completed_at,
        request_payload: request.body.clone(),
        response_data,
        status_code,
        response_time_ms,
        content_type,
        content_length,
        request_type,
    }
}

/// JSON bodies are stored compacted; anything else verbatim.
fn normalize_body(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => body.to_string(),
    }
}

fn error_descriptor(
    request: &ProbeRequest,
    message: &str,
    code: Option<&str>,
    response_body: Option<&str>,
) -> String {
    let mut descriptor = json!({
        "error": message,
        "url": request.url,
        "method": ProbeRequest::METHOD,
        "timeoutMs": u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX),
    });
    if let Some(code) = code {
        descriptor["code"] = json!(code);
    }
    if let Some(body) = response_body {
        descriptor["responseBody"] = json!(body);
    }
    descriptor.to_string()
}
