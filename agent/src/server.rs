//! HTTP surface
//!
//! Read-only views over the most recent window of measurements, plus the
//! agent's own health and Prometheus metrics. A failing sink never fails a
//! request: the handlers log and answer with empty lists.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::aggregation::{aggregate, top_by_cpu, ProcessRecord};
use crate::config::ServerConfig;
use crate::error::{AgentError, Result};
use crate::measurement::FlatRow;
use crate::metrics::AgentMetrics;
use crate::sampler::SamplerState;
use crate::sink::{MeasurementSink, TimeRange};

#[cfg(feature = "email")]
use crate::notifier::{EmailQueue, EmailRequest};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<dyn MeasurementSink>,
    pub metrics: Arc<AgentMetrics>,
    pub sampler_state: watch::Receiver<SamplerState>,
    pub query_window: Duration,
    #[cfg(feature = "email")]
    pub email: Option<EmailQueue>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub data: Vec<FlatRow>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessesResponse {
    pub processes: Vec<ProcessRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: String,
    pub ticks: u64,
    pub uptime_s: u64,
}

/// Build the router with tracing, timeout and optional CORS layers
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let routes = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/processes", get(get_processes))
        .route("/health", get(health_check))
        .route("/agent/metrics", get(agent_metrics));

    #[cfg(feature = "email")]
    let routes = routes.route("/notify/email", axum::routing::post(notify_email));

    let cors = if config.allow_cors {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    routes
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.request_timeout()))
                .layer(cors),
        )
        .with_state(state)
}

/// Serve `router` until `token` is cancelled
pub async fn serve(listener: TcpListener, router: Router, token: CancellationToken) -> Result<()> {
    let address = listener.local_addr()?;
    info!("HTTP server listening on http://{}", address);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(|e| AgentError::Http(e.to_string()))?;

    info!("HTTP server stopped");
    Ok(())
}

async fn recent_rows(state: &AppState) -> Vec<FlatRow> {
    match state.sink.query(TimeRange::last(state.query_window, Utc::now())).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Query against {} failed: {}", state.sink.name(), e);
            Vec::new()
        }
    }
}

/// Every field row from the last window
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        data: recent_rows(&state).await,
    })
}

/// Per-process view of the last window
async fn get_processes(State(state): State<AppState>, Query(query): Query<ProcessesQuery>) -> Json<ProcessesResponse> {
    let records = aggregate(&recent_rows(&state).await);
    let processes = match query.limit {
        Some(limit) => top_by_cpu(records, limit),
        None => records,
    };
    Json(ProcessesResponse { processes })
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let sampler_state = *state.sampler_state.borrow();
    let stats = state.metrics.stats();

    Json(HealthResponse {
        status: if sampler_state == SamplerState::Stopped { "stopping" } else { "ok" }.to_string(),
        state: sampler_state.to_string(),
        ticks: stats.ticks,
        uptime_s: stats.uptime_s,
    })
}

async fn agent_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.export_text() {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(e) => {
            error!("Failed to render agent metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(feature = "email")]
async fn notify_email(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Response {
    let Some(queue) = state.email.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "email not configured"})),
        )
            .into_response();
    };

    match queue.enqueue(request) {
        Ok(()) => Json(serde_json::json!({"status": "queued"})).into_response(),
        Err(e) => {
            warn!("Email request refused: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, SinkResult};
    use crate::measurement::{Measurement, CPU_USAGE, PROCESS_INFO, TAG_NAME, TAG_PID};
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct DownSink;

    #[async_trait]
    impl MeasurementSink for DownSink {
        async fn write(&self, _measurement: &Measurement) -> SinkResult<()> {
            Err(SinkError::WriteFailed { reason: "down".to_string() })
        }

        async fn query(&self, _range: TimeRange) -> SinkResult<Vec<FlatRow>> {
            Err(SinkError::Unreachable {
                url: "http://influx".to_string(),
                reason: "connection refused".to_string(),
            })
        }

        async fn health(&self) -> SinkResult<()> {
            Err(SinkError::QueryFailed { reason: "down".to_string() })
        }

        fn name(&self) -> &'static str {
            "down"
        }
    }

    fn app(sink: Arc<dyn MeasurementSink>) -> Router {
        let (_tx, rx) = watch::channel(SamplerState::Sampling);
        let state = AppState {
            sink,
            metrics: Arc::new(AgentMetrics::new().unwrap()),
            sampler_state: rx,
            query_window: Duration::from_secs(60),
            #[cfg(feature = "email")]
            email: None,
        };
        router(state, &ServerConfig::default())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn seeded_sink() -> Arc<MemorySink> {
        let sink = Arc::new(MemorySink::new());
        let now = Utc::now();
        sink.write(&Measurement::new(CPU_USAGE, now).field("usage_pct", 55.0))
            .await
            .unwrap();
        for (pid, name, cpu) in [("10", "postgres", 12.0), ("20", "nginx", 40.0), ("30", "cron", 1.0)] {
            sink.write(
                &Measurement::new(PROCESS_INFO, now)
                    .tag(TAG_PID, pid)
                    .tag(TAG_NAME, name)
                    .field("cpu_pct", cpu)
                    .field("mem_pct", 0.5),
            )
            .await
            .unwrap();
        }
        // Outside the window
        sink.write(&Measurement::new(CPU_USAGE, now - chrono::Duration::minutes(10)).field("usage_pct", 1.0))
            .await
            .unwrap();
        sink
    }

    #[tokio::test]
    async fn test_metrics_returns_recent_rows() {
        let (status, body) = get_json(app(seeded_sink().await), "/metrics").await;
        assert_eq!(status, StatusCode::OK);

        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 7);
        assert!(data
            .iter()
            .any(|r| r["measurement"] == "cpu_usage" && r["field"] == "usage_pct" && r["value"] == 55.0));
        assert!(data.iter().any(|r| r["pid"] == "20" && r["name"] == "nginx"));
    }

    #[tokio::test]
    async fn test_processes_and_limit() {
        let sink = seeded_sink().await;

        let (_, body) = get_json(app(sink.clone()), "/processes").await;
        let pids: Vec<u64> = body["processes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["pid"].as_u64().unwrap())
            .collect();
        assert_eq!(pids, vec![10, 20, 30]);

        let (_, body) = get_json(app(sink), "/processes?limit=2").await;
        let top = body["processes"].as_array().unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0]["name"], "nginx");
        assert_eq!(top[1]["name"], "postgres");
    }

    #[tokio::test]
    async fn test_sink_failure_degrades_to_empty() {
        let (status, body) = get_json(app(Arc::new(DownSink)), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"data": []}));

        let (status, body) = get_json(app(Arc::new(DownSink)), "/processes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"processes": []}));
    }

    #[tokio::test]
    async fn test_health_reports_state() {
        let (status, body) = get_json(app(Arc::new(MemorySink::new())), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["state"], "sampling");
        assert_eq!(body["ticks"], 0);
    }

    #[tokio::test]
    async fn test_agent_metrics_is_prometheus_text() {
        let response = app(Arc::new(MemorySink::new()))
            .oneshot(Request::builder().uri("/agent/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("ticks_total"));
    }

    #[cfg(feature = "email")]
    #[tokio::test]
    async fn test_notify_email_without_queue_is_unavailable() {
        let response = app(Arc::new(MemorySink::new()))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/notify/email")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"subject":"s","body":"b"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
