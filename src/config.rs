//! Configuration module for ProbeWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "probewatch.db")
    pub db_path: String,
    /// Endpoint that receives the probe POSTs
    pub target_url: String,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub analysis_interval: Duration,
    pub zscore_threshold: f64,
    pub latency_threshold_ms: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "probewatch.db".to_string(),
            target_url: "https://httpbin.org/post".to_string(),
            probe_interval: Duration::from_millis(300_000),
            probe_timeout: Duration::from_millis(30_000),
            analysis_interval: Duration::from_millis(600_000),
            zscore_threshold: 2.5,
            latency_threshold_ms: 5000.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PROBEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PROBEWATCH_DB_PATH`: Database file path (default: "probewatch.db")
    /// - `PROBEWATCH_TARGET_URL`: Probe target (default: "https://httpbin.org/post")
    /// - `PROBEWATCH_PROBE_INTERVAL_MS`: Probe interval (default: 300000)
    /// - `PROBEWATCH_PROBE_TIMEOUT_MS`: Probe timeout (default: 30000)
    /// - `PROBEWATCH_ANALYSIS_INTERVAL_MS`: Analysis interval (default: 600000)
    /// - `PROBEWATCH_ZSCORE_THRESHOLD`: Z-score threshold (default: 2.5)
    /// - `PROBEWATCH_LATENCY_THRESHOLD_MS`: Absolute latency threshold (default: 5000)
    ///
    /// Values that fail to parse fall back to the default without complaint.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("PROBEWATCH_HTTP_PORT").and_then(|s| s.trim().parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("PROBEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(url) = lookup("PROBEWATCH_TARGET_URL").filter(|s| !s.trim().is_empty()) {
            cfg.target_url = url;
        }

        if let Some(ms) = lookup("PROBEWATCH_PROBE_INTERVAL_MS").and_then(|s| parse_positive(&s)) {
            cfg.probe_interval = Duration::from_millis(ms as u64);
        }

        if let Some(ms) = lookup("PROBEWATCH_PROBE_TIMEOUT_MS").and_then(|s| parse_positive(&s)) {
            cfg.probe_timeout = Duration::from_millis(ms as u64);
        }

        if let Some(ms) =
            lookup("PROBEWATCH_ANALYSIS_INTERVAL_MS").and_then(|s| parse_positive(&s))
        {
            cfg.analysis_interval = Duration::from_millis(ms as u64);
        }

        if let Some(z) = lookup("PROBEWATCH_ZSCORE_THRESHOLD").and_then(|s| parse_finite(&s)) {
            cfg.zscore_threshold = z;
        }

        if let Some(ms) = lookup("PROBEWATCH_LATENCY_THRESHOLD_MS").and_then(|s| parse_finite(&s)) {
            cfg.latency_threshold_ms = ms;
        }

        cfg
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Durations additionally need to be at least one millisecond.
fn parse_positive(s: &str) -> Option<f64> {
    parse_finite(s).filter(|v| *v >= 1.0)
}
