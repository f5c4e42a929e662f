//! ProbeWatch - HTTP endpoint probing with anomaly detection.
//!
//! Probes a remote endpoint on a timer, stores every outcome in SQLite,
//! flags statistical outliers and streams both to live subscribers.

mod analyzer;
mod config;
mod db;
mod events;
mod probe;
mod scheduler;
mod web;

use analyzer::{AnomalyAnalyzer, Thresholds};
use config::ServerConfig;
use db::Store;
use events::{AnomalyHistory, EventBus, LiveRelay, Topic};
use probe::HttpTransport;
use scheduler::{ProbeScheduler, ProbeSettings};
use web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RELAY_CAPACITY: usize = 256;
const ANOMALY_HISTORY: usize = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("probewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting ProbeWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Event fan-out and its downstream subscribers
    let bus = Arc::new(EventBus::new());
    let relay = LiveRelay::attach(&bus, RELAY_CAPACITY);
    let history = AnomalyHistory::attach(&bus, ANOMALY_HISTORY);
    tracing::debug!(
        "Event bus ready ({} record, {} anomaly subscribers)",
        bus.subscriber_count(Topic::Record),
        bus.subscriber_count(Topic::Anomaly)
    );

    let scheduler = Arc::new(ProbeScheduler::new(
        store.clone(),
        bus.clone(),
        Arc::new(HttpTransport::new()?),
        ProbeSettings {
            target_url: cfg.target_url.clone(),
            interval: cfg.probe_interval,
            timeout: cfg.probe_timeout,
        },
    ));

    let analyzer = Arc::new(AnomalyAnalyzer::new(
        store.clone(),
        bus.clone(),
        Thresholds {
            zscore: cfg.zscore_threshold,
            latency_ms: cfg.latency_threshold_ms,
        },
        cfg.analysis_interval,
    ));

    scheduler.start().await;
    analyzer.start().await;

    // Start web server
    let server = Server::new(AppState {
        config: cfg,
        store: store.clone(),
        scheduler: scheduler.clone(),
        analyzer: analyzer.clone(),
        relay,
        history,
    });
    let result = server.start(shutdown_signal()).await;

    scheduler.stop().await;
    analyzer.stop().await;
    store.close();
    tracing::info!("ProbeWatch stopped");

    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
