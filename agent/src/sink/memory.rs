//! In-process sink
//!
//! Append-only and unbounded; meant for tests and short-lived local runs.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MeasurementSink, TimeRange};
use crate::error::SinkResult;
use crate::measurement::{FlatRow, Measurement};

#[derive(Debug, Default)]
pub struct MemorySink {
    measurements: RwLock<Vec<Measurement>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, in write order
    pub async fn measurements(&self) -> Vec<Measurement> {
        self.measurements.read().await.clone()
    }

    /// Number of measurements written to `stream`
    pub async fn count(&self, stream: &str) -> usize {
        self.measurements
            .read()
            .await
            .iter()
            .filter(|m| m.stream == stream)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.measurements.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.measurements.read().await.is_empty()
    }
}

#[async_trait]
impl MeasurementSink for MemorySink {
    async fn write(&self, measurement: &Measurement) -> SinkResult<()> {
        self.measurements.write().await.push(measurement.clone());
        Ok(())
    }

    async fn query(&self, range: TimeRange) -> SinkResult<Vec<FlatRow>> {
        Ok(self
            .measurements
            .read()
            .await
            .iter()
            .filter(|m| range.contains(m.timestamp))
            .flat_map(Measurement::flatten)
            .collect())
    }

    async fn health(&self) -> SinkResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
