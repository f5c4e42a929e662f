//! Probe module: outbound HTTP checks against the monitored endpoint.

mod http;
mod payload;

pub use http::*;
pub use payload::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: String,
    pub body: String,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub const METHOD: &'static str = "POST";
}

/// A 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Result of a single transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Success(ProbeResponse),
    /// The server answered, but not with a 2xx.
    HttpError {
        status: u16,
        body: String,
        message: String,
    },
    /// No HTTP response at all (refused, DNS, timeout, broken body...).
    NetworkFailure {
        message: String,
        code: Option<String>,
    },
}

/// Sends probe requests. Failures are folded into [`ProbeOutcome`], never raised.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn send(&self, request: &ProbeRequest) -> ProbeOutcome;
}
