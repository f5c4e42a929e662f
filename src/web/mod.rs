//! Web server module.

mod error;
mod handlers;

use crate::analyzer::AnomalyAnalyzer;
use crate::config::ServerConfig;
use crate::db::Store;
use crate::events::{AnomalyHistory, LiveRelay};
use crate::scheduler::ProbeScheduler;

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<ProbeScheduler>,
    pub analyzer: Arc<AnomalyAnalyzer>,
    pub relay: LiveRelay,
    pub history: Arc<AnomalyHistory>,
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/health", get(handlers::handle_health))
        // API endpoints
        .route("/api/records", get(handlers::handle_list_records))
        .route("/api/records/recent", get(handlers::handle_recent_records))
        .route("/api/statistics", get(handlers::handle_statistics))
        .route("/api/probe", post(handlers::handle_trigger_probe))
        .route("/api/anomalies", get(handlers::handle_recent_anomalies))
        .route("/api/anomalies/snapshot", get(handlers::handle_anomaly_snapshot))
        .route("/api/events", get(handlers::handle_event_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Web server for ProbeWatch.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(
        &self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = router(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Thresholds;
    use crate::db::{NewProbeRecord, RequestType};
    use crate::events::EventBus;
    use crate::probe::{ProbeOutcome, ProbeRequest, ProbeTransport};
    use crate::scheduler::ProbeSettings;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    struct RefusingTransport;

    #[async_trait]
    impl ProbeTransport for RefusingTransport {
        async fn send(&self, _request: &ProbeRequest) -> ProbeOutcome {
            ProbeOutcome::NetworkFailure {
                message: "connect ECONNREFUSED".to_string(),
                code: Some("ECONNREFUSED".to_string()),
            }
        }
    }

    fn test_state() -> (NamedTempFile, AppState) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let bus = Arc::new(EventBus::new());
        let relay = LiveRelay::attach(&bus, 16);
        let history = AnomalyHistory::attach(&bus, 10);
        let config = ServerConfig::default();

        let scheduler = Arc::new(ProbeScheduler::new(
            store.clone(),
            bus.clone(),
            Arc::new(RefusingTransport),
            ProbeSettings {
                target_url: "http://127.0.0.1:9/post".to_string(),
                interval: config.probe_interval,
                timeout: Duration::from_secs(1),
            },
        ));
        let analyzer = Arc::new(AnomalyAnalyzer::new(
            store.clone(),
            bus,
            Thresholds::default(),
            config.analysis_interval,
        ));

        let state = AppState {
            config,
            store,
            scheduler,
            analyzer,
            relay,
            history,
        };
        (tmp, state)
    }

    fn seed(store: &Store, status_code: u16, response_time_ms: u64) -> i64 {
        store
            .insert(&NewProbeRecord {
                timestamp: Utc::now(),
                request_payload: "{}".to_string(),
                response_data: "{}".to_string(),
                status_code,
                response_time_ms,
                content_type: Some("application/json".to_string()),
                content_length: Some(2),
                request_type: RequestType::Auto,
            })
            .unwrap()
    }

    async fn call(state: &AppState, method: &str, uri: &str) -> (StatusCode, Value) {
        let resp = router(state.clone())
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_list_records_pagination() {
        let (_tmp, state) = test_state();
        seed(&state.store, 200, 10);
        seed(&state.store, 404, 20);

        let (status, body) = call(&state, "GET", "/api/records?limit=1&offset=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"].as_array().unwrap().len(), 1);
        assert_eq!(body["total"], 2);
        assert_eq!(body["hasMore"], true);

        let (_, body) = call(&state, "GET", "/api/records?statusCode=404").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["records"][0]["statusCode"], 404);
        assert_eq!(body["hasMore"], false);
    }

    #[tokio::test]
    async fn test_invalid_query_is_bad_request() {
        let (_tmp, state) = test_state();
        for uri in [
            "/api/records?limit=0",
            "/api/records?limit=5000",
            "/api/records?offset=-3",
            "/api/records?startTime=yesterday",
            "/api/statistics?hours=0",
            "/api/records/recent?minutes=-1",
        ] {
            let (status, body) = call(&state, "GET", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body["error"].as_str().unwrap().contains("invalid query"));
        }
    }

    #[tokio::test]
    async fn test_statistics_endpoint() {
        let (_tmp, state) = test_state();
        seed(&state.store, 200, 100);
        seed(&state.store, 200, 200);
        seed(&state.store, 500, 300);

        let (status, body) = call(&state, "GET", "/api/statistics?hours=24").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalRequests"], 3);
        assert_eq!(body["averageResponseTimeMs"], 200);
        assert_eq!(body["successRatePercent"], 67);
        assert_eq!(body["statusCodeDistribution"]["200"], 2);
        assert_eq!(body["statusCodeDistribution"]["500"], 1);
    }

    #[tokio::test]
    async fn test_manual_probe_endpoint() {
        let (_tmp, state) = test_state();
        let mut rx = state.relay.subscribe();

        let (status, body) = call(&state, "POST", "/api/probe").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["statusCode"], 0);
        assert_eq!(body["requestType"], "manual");
        assert!(body["responseData"].as_str().unwrap().contains("ECONNREFUSED"));

        match rx.try_recv().unwrap() {
            crate::events::Event::Record(r) => assert_eq!(r.request_type, RequestType::Manual),
            other => panic!("unexpected event: {:?}", other),
        }

        let (_, recent) = call(&state, "GET", "/api/records/recent").await;
        assert_eq!(recent.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_and_storage_errors() {
        let (_tmp, state) = test_state();
        seed(&state.store, 200, 100);
        seed(&state.store, 503, 300);

        let (status, body) = call(&state, "GET", "/api/anomalies/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalRequests"], 2);
        assert_eq!(body["errorRatePercent"], 50.0);
        assert_eq!(body["stats"]["count"], 2);

        state.store.close();
        let (status, body) = call(&state, "GET", "/api/records").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
        let (status, _) = call(&state, "GET", "/api/statistics").await;
        assert!(status.is_server_error());
        let (status, _) = call(&state, "POST", "/api/probe").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let (status, body) = call(&state, "GET", "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["storage"], false);
    }
}
