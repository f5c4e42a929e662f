//! HTTP probe transport.

use super::{ProbeError, ProbeOutcome, ProbeRequest, ProbeResponse, ProbeTransport};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::error::Error as _;

pub const PROBE_USER_AGENT: &str = concat!("probewatch/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed transport that POSTs JSON payloads.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn send(&self, request: &ProbeRequest) -> ProbeOutcome {
        let response = match self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, PROBE_USER_AGENT)
            .timeout(request.timeout)
            .body(request.body.clone())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return network_failure(&e),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Read the full body so the timing covers the complete transfer
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return network_failure(&e),
        };

        let code = status.as_u16();
        if !(100..=599).contains(&code) {
            return ProbeOutcome::NetworkFailure {
                message: format!("Response carried non-standard status code {}", code),
                code: Some("INVALID_STATUS".to_string()),
            };
        }

        if status.is_success() {
            ProbeOutcome::Success(ProbeResponse {
                status: code,
                content_type,
                body,
            })
        } else {
            ProbeOutcome::HttpError {
                status: code,
                body,
                message: format!("Request failed with status code {}", code),
            }
        }
    }
}

fn network_failure(e: &reqwest::Error) -> ProbeOutcome {
    ProbeOutcome::NetworkFailure {
        message: error_chain(e),
        code: error_code(e).map(str::to_string),
    }
}

/// reqwest's top-level message hides the cause ("error sending request"),
/// so walk the source chain.
fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        message.push_str(": ");
        message.push_str(&s.to_string());
        source = s.source();
    }
    message
}

fn error_code(e: &reqwest::Error) -> Option<&'static str> {
    if e.is_timeout() {
        Some("TIMEOUT")
    } else if e.is_connect() {
        Some("CONNECT")
    } else if e.is_body() || e.is_decode() {
        Some("BODY")
    } else if e.is_request() {
        Some("REQUEST")
    } else {
        None
    }
}
