//! Self-metrics for the SystemPulse agent
//!
//! Counters describing the agent's own behavior (ticks, sink writes, alerts,
//! exports), exposed in Prometheus text format on `/agent/metrics`. These are
//! distinct from the host measurements the agent collects.

use std::time::{Duration, Instant};

use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, MetricsError, MetricsResult};
use crate::sampler::SamplerState;

/// Agent metrics registry
pub struct AgentMetrics {
    /// Prometheus registry
    registry: Registry,

    /// Registered counters
    counters: AgentCounters,

    /// Creation time, used for uptime
    start_time: Instant,
}

/// Counters, histograms and gauges registered by the agent
#[derive(Clone)]
pub struct AgentCounters {
    // Sampling
    pub ticks: IntCounter,
    pub tick_failures: IntCounter,
    pub tick_duration: Histogram,
    pub sampler_state: IntGauge,
    pub processes_skipped: IntCounter,
    pub counter_resets: IntCounter,

    // Sink
    pub rows_written: IntCounter,
    pub write_errors: IntCounter,

    // Alerting
    pub alerts_fired: IntCounter,
    pub notifications_failed: IntCounter,

    // Export
    pub exports: IntCounter,
    pub export_failures: IntCounter,

    // Failures by error category
    pub errors: IntCounterVec,
}

/// Point-in-time view of the agent counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub ticks: u64,
    pub tick_failures: u64,
    pub rows_written: u64,
    pub write_errors: u64,
    pub alerts_fired: u64,
    pub notifications_failed: u64,
    pub exports: u64,
    pub export_failures: u64,
    pub uptime_s: u64,
}

impl AgentMetrics {
    /// Create a registry with every agent metric registered
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let counters = AgentCounters::new(&registry)?;

        Ok(Self {
            registry,
            counters,
            start_time: Instant::now(),
        })
    }

    pub fn counters(&self) -> &AgentCounters {
        &self.counters
    }

    /// Record a completed tick
    pub fn record_tick(&self, duration: Duration) {
        self.counters.ticks.inc();
        self.counters.tick_duration.observe(duration.as_secs_f64());
    }

    /// Record a tick that ended early
    pub fn record_tick_failure(&self) {
        self.counters.tick_failures.inc();
    }

    pub fn record_rows_written(&self, count: u64) {
        self.counters.rows_written.inc_by(count);
    }

    pub fn record_write_error(&self) {
        self.counters.write_errors.inc();
    }

    pub fn record_alerts(&self, count: u64) {
        self.counters.alerts_fired.inc_by(count);
    }

    pub fn record_notification_failed(&self) {
        self.counters.notifications_failed.inc();
    }

    pub fn record_export(&self, success: bool) {
        if success {
            self.counters.exports.inc();
        } else {
            self.counters.export_failures.inc();
        }
    }

    pub fn record_processes_skipped(&self, count: u64) {
        self.counters.processes_skipped.inc_by(count);
    }

    pub fn record_counter_resets(&self, count: u64) {
        self.counters.counter_resets.inc_by(count);
    }

    pub fn set_sampler_state(&self, state: SamplerState) {
        self.counters.sampler_state.set(state.as_gauge());
    }

    /// Count a handled failure under its category
    pub fn record_error(&self, error: &AgentError) {
        self.counters.errors.with_label_values(&[error.category()]).inc();
    }

    /// Failures recorded so far for `category`
    pub fn error_count(&self, category: &str) -> u64 {
        self.counters.errors.with_label_values(&[category]).get()
    }

    /// Seconds since the registry was created
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Current agent statistics
    pub fn stats(&self) -> AgentStats {
        AgentStats {
            ticks: self.counters.ticks.get(),
            tick_failures: self.counters.tick_failures.get(),
            rows_written: self.counters.rows_written.get(),
            write_errors: self.counters.write_errors.get(),
            alerts_fired: self.counters.alerts_fired.get(),
            notifications_failed: self.counters.notifications_failed.get(),
            exports: self.counters.exports.get(),
            export_failures: self.counters.export_failures.get(),
            uptime_s: self.uptime().as_secs(),
        }
    }

    /// Render every metric in Prometheus text format
    pub fn export_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })?;
        String::from_utf8(buffer).map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })
    }
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, metric: prometheus::Result<C>) -> MetricsResult<C> {
    let metric = metric.map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
    registry
        .register(Box::new(metric.clone()))
        .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
    Ok(metric)
}

impl AgentCounters {
    fn new(registry: &Registry) -> MetricsResult<Self> {
        Ok(Self {
            ticks: register(registry, IntCounter::new("ticks_total", "Sampler ticks completed"))?,
            tick_failures: register(
                registry,
                IntCounter::new("tick_failures_total", "Sampler ticks that ended on a capture failure"),
            )?,
            tick_duration: register(
                registry,
                Histogram::with_opts(
                    HistogramOpts::new("tick_duration_seconds", "Sampler tick duration")
                        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0]),
                ),
            )?,
            sampler_state: register(
                registry,
                IntGauge::new("sampler_state", "Sampler state (0 warming, 1 sampling, 2 stopped)"),
            )?,
            processes_skipped: register(
                registry,
                IntCounter::new("processes_skipped_total", "Processes that vanished mid-scan"),
            )?,
            counter_resets: register(
                registry,
                IntCounter::new("counter_resets_total", "Cumulative counters observed going backwards"),
            )?,
            rows_written: register(
                registry,
                IntCounter::new("rows_written_total", "Measurements written to the sink"),
            )?,
            write_errors: register(
                registry,
                IntCounter::new("write_errors_total", "Measurements the sink rejected"),
            )?,
            alerts_fired: register(registry, IntCounter::new("alerts_fired_total", "Alert notifications raised"))?,
            notifications_failed: register(
                registry,
                IntCounter::new("notifications_failed_total", "Notification deliveries that failed or timed out"),
            )?,
            exports: register(registry, IntCounter::new("exports_total", "Snapshot files written"))?,
            export_failures: register(
                registry,
                IntCounter::new("export_failures_total", "Snapshot exports that failed"),
            )?,
            errors: register(
                registry,
                IntCounterVec::new(Opts::new("errors_total", "Handled failures by category"), &["category"]),
            )?,
        })
    }
}
