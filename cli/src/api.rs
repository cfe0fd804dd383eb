use crate::error::{PulseError, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Clone)]
pub struct PulseClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub state: String,
    pub ticks: u64,
    pub uptime_s: u64,
}

/// One field of one measurement, as served by `/metrics` and stored in
/// snapshot files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub time: DateTime<Utc>,
    pub measurement: String,
    pub field: String,
    pub value: f64,
    #[serde(flatten)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetricsResponse {
    data: Vec<MetricRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub cpu_pct: f64,
    pub mem_pct: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProcessesResponse {
    processes: Vec<ProcessRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmailRequest {
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub status: String,
}

impl PulseClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request_with_timeout<T>(&self, future: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        timeout(self.timeout, future).await.map_err(|_| PulseError::Timeout)?
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.request_with_timeout(async {
            let response = self
                .client
                .get(format!("{}{}", self.base_url, path))
                .query(query)
                .send()
                .await
                .map_err(map_send_error)?;

            self.handle_response(response).await
        })
        .await
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.get("/health", &[]).await
    }

    pub async fn metrics(&self) -> Result<Vec<MetricRow>> {
        let response: MetricsResponse = self.get("/metrics", &[]).await?;
        Ok(response.data)
    }

    pub async fn processes(&self, limit: Option<usize>) -> Result<Vec<ProcessRecord>> {
        let query: Vec<(&str, String)> = limit.map(|l| ("limit", l.to_string())).into_iter().collect();
        let response: ProcessesResponse = self.get("/processes", &query).await?;
        Ok(response.processes)
    }

    pub async fn notify_email(&self, request: &EmailRequest) -> Result<NotifyResponse> {
        self.request_with_timeout(async {
            let response = self
                .client
                .post(format!("{}/notify/email", self.base_url))
                .json(request)
                .send()
                .await
                .map_err(map_send_error)?;

            // Agents built without email support have no such route
            match response.status() {
                StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => Err(PulseError::EmailDisabled),
                _ => self.handle_response(response).await,
            }
        })
        .await
    }

    async fn handle_response<T>(&self, response: Response) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| PulseError::Api {
                message: format!("Failed to parse response: {}", e),
            })
        } else {
            Err(PulseError::Api {
                message: format!("HTTP {}: {}", status, text),
            })
        }
    }
}

fn map_send_error(error: reqwest::Error) -> PulseError {
    if error.is_connect() {
        PulseError::ServiceUnavailable
    } else if error.is_timeout() {
        PulseError::Timeout
    } else {
        PulseError::Http(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode as AxumStatus, routing::get, routing::post, Json, Router};
    use std::collections::HashMap;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_metrics_rows_keep_tags() {
        let app = Router::new().route(
            "/metrics",
            get(|| async {
                Json(serde_json::json!({"data": [{
                    "time": "2024-01-01T00:00:05Z",
                    "measurement": "process_info",
                    "field": "cpu_pct",
                    "value": 3.5,
                    "hostname": "web-1",
                    "pid": "42",
                    "name": "sshd"
                }]}))
            }),
        );
        let client = PulseClient::new(spawn(app).await).unwrap();

        let rows = client.metrics().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 3.5);
        assert_eq!(rows[0].tags.get("pid").map(String::as_str), Some("42"));
        assert_eq!(rows[0].tags.len(), 3);
    }

    #[tokio::test]
    async fn test_processes_sends_limit() {
        let app = Router::new().route(
            "/processes",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let limit: usize = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(10);
                let processes: Vec<_> = (0..limit)
                    .map(|i| serde_json::json!({"pid": i, "name": format!("p{}", i), "cpu_pct": 1.0, "mem_pct": 0.5}))
                    .collect();
                Json(serde_json::json!({ "processes": processes }))
            }),
        );
        let client = PulseClient::new(spawn(app).await).unwrap();

        assert_eq!(client.processes(Some(3)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_email_route_missing_means_disabled() {
        let app = Router::new().route("/notify/other", post(|| async { AxumStatus::OK }));
        let client = PulseClient::new(spawn(app).await).unwrap();

        let err = client
            .notify_email(&EmailRequest {
                subject: "s".to_string(),
                body: "b".to_string(),
                to: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::EmailDisabled));
    }

    #[tokio::test]
    async fn test_unreachable_agent() {
        let client = PulseClient::new("http://127.0.0.1:9").unwrap();
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, PulseError::ServiceUnavailable | PulseError::Http(_)));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = PulseClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }
}
