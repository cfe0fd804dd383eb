//! Measurement sinks
//!
//! The sink is the agent's only persistence: the sampler writes one
//! `Measurement` at a time, and the exporter and HTTP layer read back flat
//! rows for a time range.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::SinkResult;
use crate::measurement::{FlatRow, Measurement};

pub mod influx;
pub mod memory;

pub use influx::InfluxSink;
pub use memory::MemorySink;

/// Inclusive time range for sink queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self { start, stop }
    }

    /// The `window` ending at `now`
    pub fn last(window: Duration, now: DateTime<Utc>) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        Self { start: now - window, stop: now }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.stop
    }
}

/// Time-series store the agent writes to and reads back from
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    /// Persist one measurement
    async fn write(&self, measurement: &Measurement) -> SinkResult<()>;

    /// All field rows whose timestamp falls in `range`
    async fn query(&self, range: TimeRange) -> SinkResult<Vec<FlatRow>>;

    /// Check the store is reachable
    async fn health(&self) -> SinkResult<()>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the sink selected by configuration
pub fn from_config(config: &StoreConfig) -> SinkResult<Arc<dyn MeasurementSink>> {
    match config.backend {
        StoreBackend::Influx => Ok(Arc::new(InfluxSink::from_config(config)?)),
        StoreBackend::Memory => Ok(Arc::new(MemorySink::new())),
    }
}
