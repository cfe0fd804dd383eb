//! InfluxDB v2 sink over the HTTP API

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{MeasurementSink, TimeRange};
use crate::config::StoreConfig;
use crate::error::{SinkError, SinkResult};
use crate::measurement::{FlatRow, Measurement};

/// Flux CSV columns that are never tags
const RESERVED_COLUMNS: &[&str] = &["", "result", "table"];

#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl InfluxSink {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
        timeout: Duration,
    ) -> SinkResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
        })
    }

    pub fn from_config(config: &StoreConfig) -> SinkResult<Self> {
        Self::new(
            &config.url,
            &config.token,
            &config.org,
            &config.bucket,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    fn map_send_error(&self, error: reqwest::Error) -> SinkError {
        if error.is_connect() || error.is_timeout() {
            SinkError::Unreachable {
                url: self.url.clone(),
                reason: error.to_string(),
            }
        } else {
            SinkError::Transport(error)
        }
    }

    /// Flux query selecting every field in `range`
    pub fn range_query(&self, range: TimeRange) -> String {
        // Flux `stop` is exclusive
        let stop = range.stop + chrono::Duration::nanoseconds(1);
        format!(
            "from(bucket: \"{}\")\n  |> range(start: {}, stop: {})",
            self.bucket,
            range.start.to_rfc3339_opts(SecondsFormat::Nanos, true),
            stop.to_rfc3339_opts(SecondsFormat::Nanos, true),
        )
    }
}

#[async_trait]
impl MeasurementSink for InfluxSink {
    async fn write(&self, measurement: &Measurement) -> SinkResult<()> {
        let Some(line) = measurement.to_line_protocol() else {
            debug!("Skipping {} measurement with no finite fields", measurement.stream);
            return Ok(());
        };

        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[("org", self.org.as_str()), ("bucket", self.bucket.as_str()), ("precision", "ns")])
            .header("Authorization", self.auth_header())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn query(&self, range: TimeRange) -> SinkResult<Vec<FlatRow>> {
        let response = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", self.auth_header())
            .header("Accept", "application/csv")
            .header("Content-Type", "application/vnd.flux")
            .body(self.range_query(range))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        parse_flux_csv(&body)
    }

    async fn health(&self) -> SinkResult<()> {
        let response = self
            .client
            .get(format!("{}/health", self.url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let health: HealthResponse = response.json().await.map_err(|e| SinkError::MalformedResponse {
            reason: e.to_string(),
        })?;

        if status == StatusCode::OK && health.status == "pass" {
            Ok(())
        } else {
            Err(SinkError::Unreachable {
                url: self.url.clone(),
                reason: health.message.unwrap_or(health.status),
            })
        }
    }

    fn name(&self) -> &'static str {
        "influxdb"
    }
}

/// Parse a Flux CSV response into flat rows.
///
/// The response holds one or more tables, each introduced by its own header
/// row and separated by blank lines. Rows whose `_value` is not numeric are
/// skipped.
pub fn parse_flux_csv(body: &str) -> SinkResult<Vec<FlatRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    let mut header: Option<csv::StringRecord> = None;

    for record in reader.records() {
        let record = record.map_err(|e| SinkError::MalformedResponse { reason: e.to_string() })?;

        if record.iter().all(str::is_empty) {
            header = None;
            continue;
        }
        if record.iter().any(|c| c == "_value") && record.iter().any(|c| c == "_time") {
            header = Some(record);
            continue;
        }
        let Some(columns) = header.as_ref() else {
            return Err(SinkError::MalformedResponse {
                reason: "data row before header".to_string(),
            });
        };

        if let Some(row) = flat_row(columns, &record)? {
            rows.push(row);
        }
    }

    Ok(rows)
}

fn flat_row(columns: &csv::StringRecord, record: &csv::StringRecord) -> SinkResult<Option<FlatRow>> {
    let mut time = None;
    let mut value = None;
    let mut field = String::new();
    let mut measurement = String::new();
    let mut tags = BTreeMap::new();

    for (column, cell) in columns.iter().zip(record.iter()) {
        match column {
            "_time" => {
                let parsed = DateTime::parse_from_rfc3339(cell).map_err(|e| SinkError::MalformedResponse {
                    reason: format!("bad _time {:?}: {}", cell, e),
                })?;
                time = Some(parsed.with_timezone(&Utc));
            }
            "_value" => value = cell.parse::<f64>().ok(),
            "_field" => field = cell.to_string(),
            "_measurement" => measurement = cell.to_string(),
            c if c.starts_with('_') || RESERVED_COLUMNS.contains(&c) => {}
            c => {
                if !cell.is_empty() {
                    tags.insert(c.to_string(), cell.to_string());
                }
            }
        }
    }

    Ok(match (time, value) {
        (Some(time), Some(value)) => Some(FlatRow {
            time,
            measurement,
            field,
            value,
            tags,
        }),
        _ => None,
    })
}
