//! SystemPulse agent library
//!
//! Samples host counters on a fixed interval, turns them into rates, writes
//! them to a measurement store, raises threshold alerts and periodically
//! exports the recent window to snapshot files. A small HTTP surface serves
//! the recent window to dashboards.

pub mod aggregation;
pub mod alerts;
pub mod collector;
pub mod config;
pub mod error;
pub mod exporter;
pub mod measurement;
pub mod metrics;
pub mod normalizer;
pub mod notifier;
pub mod sampler;
pub mod server;
pub mod service;
pub mod sink;
pub mod snapshot;

// Re-export commonly used types
pub use aggregation::{aggregate, top_by_cpu, ProcessRecord};
pub use alerts::{AlertRule, Comparison, Notification};
pub use collector::SysinfoSource;
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use exporter::SnapshotExporter;
pub use measurement::{FlatRow, Measurement};
pub use metrics::AgentMetrics;
pub use normalizer::{RateNormalizer, RateSample, ResetPolicy};
pub use notifier::{NotificationDispatcher, Notifier};
pub use sampler::{Sampler, SamplerState, TickReport};
pub use service::AgentService;
pub use sink::{MeasurementSink, MemorySink, TimeRange};
pub use snapshot::{CounterSnapshot, CounterSource};
