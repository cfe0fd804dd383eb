//! The sampling loop
//!
//! One `Sampler` owns the counter source and the previous snapshot. Each tick
//! captures counters, derives rates, writes one batch of measurements to the
//! sink, evaluates alert rules and, when due, exports a snapshot file.
//!
//! Nothing inside a tick propagates an error: capture failures end the tick
//! early, sink failures are counted and the batch carries on.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerts::{self, AlertRule};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::exporter::SnapshotExporter;
use crate::measurement::{
    Measurement, CPU_INFO, CPU_USAGE, DISK_IO, MEMORY_USAGE, NETWORK_ACTIVITY, PROCESS_INFO, SYSTEM_LOAD,
    SYSTEM_UPTIME, TAG_HOSTNAME, TAG_NAME, TAG_PID,
};
use crate::metrics::AgentMetrics;
use crate::normalizer::{RateNormalizer, RateSample};
use crate::notifier::NotificationDispatcher;
use crate::sink::MeasurementSink;
use crate::snapshot::{CounterSnapshot, CounterSource, CpuIdentity};

const MIB: f64 = 1024.0 * 1024.0;

/// Lifecycle of the sampler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerState {
    /// No previous snapshot yet
    #[default]
    Warming,

    /// Producing a batch every tick
    Sampling,

    /// Cancelled
    Stopped,
}

impl SamplerState {
    pub fn as_gauge(self) -> i64 {
        match self {
            SamplerState::Warming => 0,
            SamplerState::Sampling => 1,
            SamplerState::Stopped => 2,
        }
    }
}

impl fmt::Display for SamplerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SamplerState::Warming => "warming",
            SamplerState::Sampling => "sampling",
            SamplerState::Stopped => "stopped",
        })
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// State after the tick
    pub state: SamplerState,

    /// Whether the counter capture succeeded
    pub captured: bool,

    /// Measurements accepted by the sink
    pub rows_written: usize,

    /// Measurements the sink rejected
    pub rows_failed: usize,

    /// Processes skipped because they vanished mid-scan
    pub processes_skipped: usize,

    /// Alert notifications raised
    pub notifications: usize,

    /// Snapshot file written this tick
    pub export: Option<PathBuf>,
}

/// The sampling loop and its state
pub struct Sampler {
    source: Box<dyn CounterSource>,
    sink: Arc<dyn MeasurementSink>,
    metrics: Arc<AgentMetrics>,
    normalizer: RateNormalizer,
    rules: Vec<AlertRule>,
    dispatcher: Option<NotificationDispatcher>,
    exporter: Option<SnapshotExporter>,
    export_interval: Duration,
    interval: Duration,
    hostname: String,
    state: watch::Sender<SamplerState>,
    previous: Option<(CounterSnapshot, DateTime<Utc>)>,
    last_export: Option<DateTime<Utc>>,
    cpu_info_written: bool,
}

impl Sampler {
    pub fn new(source: Box<dyn CounterSource>, sink: Arc<dyn MeasurementSink>, metrics: Arc<AgentMetrics>) -> Self {
        let (state, _) = watch::channel(SamplerState::Warming);
        metrics.set_sampler_state(SamplerState::Warming);

        Self {
            source,
            sink,
            metrics,
            normalizer: RateNormalizer::default(),
            rules: Vec::new(),
            dispatcher: None,
            exporter: None,
            export_interval: Duration::from_secs(300),
            interval: Duration::from_secs(5),
            hostname: "localhost".to_string(),
            state,
            previous: None,
            last_export: None,
            cpu_info_written: false,
        }
    }

    /// Apply sampler, alert and export settings from configuration
    pub fn configured(mut self, config: &AgentConfig) -> Self {
        self.normalizer = RateNormalizer::new(
            Duration::from_secs(config.sampler.rate_floor_secs),
            config.sampler.reset_policy,
        );
        self.rules = config.alerts.rules.clone();
        self.interval = config.sampler.interval();
        if config.export.enabled {
            self.exporter = Some(SnapshotExporter::new(&config.export.directory, config.export.window()));
            self.export_interval = config.export.interval();
        }
        self
    }

    pub fn with_normalizer(mut self, normalizer: RateNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_rules(mut self, rules: Vec<AlertRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_exporter(mut self, exporter: SnapshotExporter, every: Duration) -> Self {
        self.exporter = Some(exporter);
        self.export_interval = every;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn state(&self) -> SamplerState {
        *self.state.borrow()
    }

    /// Receiver that follows state transitions
    pub fn subscribe(&self) -> watch::Receiver<SamplerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SamplerState) {
        self.state.send_replace(state);
        self.metrics.set_sampler_state(state);
    }

    /// Run one tick as of `now`
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        let started = Instant::now();

        let report = match self.state() {
            SamplerState::Warming => self.warm_up(now).await,
            SamplerState::Sampling => self.sample(now).await,
            SamplerState::Stopped => TickReport {
                state: SamplerState::Stopped,
                ..TickReport::default()
            },
        };

        if report.captured {
            self.metrics.record_tick(started.elapsed());
        } else if report.state != SamplerState::Stopped {
            self.metrics.record_tick_failure();
        }
        report
    }

    async fn warm_up(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let snapshot = match self.source.capture().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.capture_failed("Initial counter capture failed", e.into());
                return report;
            }
        };
        report.captured = true;

        self.write_cpu_info(now, &mut report).await;

        self.previous = Some((snapshot, now));
        self.last_export = Some(now);
        self.set_state(SamplerState::Sampling);
        info!("Sampler warmed up, sampling every {:?}", self.interval);

        report.state = SamplerState::Sampling;
        report
    }

    async fn sample(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            state: SamplerState::Sampling,
            ..TickReport::default()
        };

        let current = match self.source.capture().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.capture_failed("Counter capture failed", e.into());
                return report;
            }
        };
        report.captured = true;

        self.write_cpu_info(now, &mut report).await;

        let Some((previous, previous_time)) = self.previous.take() else {
            // Sampling always has a previous snapshot; rebuild it if not
            self.previous = Some((current, now));
            return report;
        };

        let rates = self.normalizer.normalize(&previous, previous_time, &current, now);
        if !rates.counter_resets.is_empty() {
            warn!("Counters went backwards: {}", rates.counter_resets.join(", "));
            self.metrics.record_counter_resets(rates.counter_resets.len() as u64);
        }

        report.processes_skipped = current.vanished_count();
        if report.processes_skipped > 0 {
            debug!("Skipped {} processes that exited mid-scan", report.processes_skipped);
            self.metrics.record_processes_skipped(report.processes_skipped as u64);
        }

        let batch = self.build_batch(&current, &rates, now);
        self.write_batch(&batch, &mut report).await;

        let notifications = alerts::evaluate(&rates, &self.rules, now);
        for notification in &notifications {
            warn!("{}", notification);
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.dispatch(notification);
            }
        }
        report.notifications = notifications.len();
        self.metrics.record_alerts(notifications.len() as u64);

        self.previous = Some((current, now));

        report.export = self.export_if_due(now).await;
        report
    }

    /// Write `cpu_info` until one write lands
    async fn write_cpu_info(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        if self.cpu_info_written {
            return;
        }

        match self.source.cpu_identity().await {
            Ok(identity) => {
                let measurement = self.cpu_info(&identity, now);
                let written = report.rows_written;
                self.write_batch(std::slice::from_ref(&measurement), report).await;
                self.cpu_info_written = report.rows_written > written;
            }
            Err(e) => {
                let e = AgentError::from(e);
                warn!("CPU identity unavailable, retrying next tick: {}", e);
                self.metrics.record_error(&e);
            }
        }
    }

    fn capture_failed(&self, context: &str, e: AgentError) {
        if e.is_recoverable() {
            warn!("{}: {}", context, e);
        } else {
            error!("{}: {}", context, e);
        }
        self.metrics.record_error(&e);
    }

    async fn write_batch(&self, batch: &[Measurement], report: &mut TickReport) {
        let mut first_error = None;

        for measurement in batch {
            match self.sink.write(measurement).await {
                Ok(()) => report.rows_written += 1,
                Err(e) => {
                    report.rows_failed += 1;
                    self.metrics.record_write_error();
                    debug!("Write of {} failed: {}", measurement.stream, e);
                    let e = AgentError::from(e);
                    self.metrics.record_error(&e);
                    first_error.get_or_insert(e);
                }
            }
        }

        self.metrics.record_rows_written(report.rows_written as u64);
        if let Some(e) = first_error {
            warn!(
                "{} of {} measurements not written to {}: {}",
                report.rows_failed,
                batch.len(),
                self.sink.name(),
                e
            );
        }
    }

    async fn export_if_due(&mut self, now: DateTime<Utc>) -> Option<PathBuf> {
        let exporter = self.exporter.as_ref()?;
        let last = self.last_export?;
        let interval = chrono::Duration::from_std(self.export_interval).ok()?;
        if now - last < interval {
            return None;
        }

        self.last_export = Some(now);
        match exporter.export(self.sink.as_ref(), now).await {
            Ok(path) => {
                self.metrics.record_export(true);
                Some(path)
            }
            Err(e) => {
                error!("Snapshot export failed: {}", e);
                self.metrics.record_export(false);
                self.metrics.record_error(&AgentError::from(e));
                None
            }
        }
    }

    fn measurement(&self, stream: &str, now: DateTime<Utc>) -> Measurement {
        Measurement::new(stream, now).tag(TAG_HOSTNAME, self.hostname.as_str())
    }

    fn cpu_info(&self, identity: &CpuIdentity, now: DateTime<Utc>) -> Measurement {
        self.measurement(CPU_INFO, now)
            .tag("brand", identity.brand.as_str())
            .field("physical_cores", identity.physical_cores as f64)
            .field("logical_cores", identity.logical_cores as f64)
            .field("frequency_mhz", identity.frequency_mhz as f64)
    }

    /// Measurements for one sampling tick
    fn build_batch(&self, current: &CounterSnapshot, rates: &RateSample, now: DateTime<Utc>) -> Vec<Measurement> {
        let mut batch = Vec::with_capacity(6 + current.processes.len());

        batch.push(self.measurement(CPU_USAGE, now).field("usage_pct", rates.cpu_pct));

        batch.push(
            self.measurement(MEMORY_USAGE, now)
                .field("total_mb", current.memory.total_bytes as f64 / MIB)
                .field("used_mb", current.memory.used_bytes as f64 / MIB)
                .field("used_pct", rates.mem_pct),
        );

        batch.push(
            self.measurement(DISK_IO, now)
                .field("read_mb_s", rates.disk.read_mb_s)
                .field("write_mb_s", rates.disk.write_mb_s)
                .field("read_iops", rates.disk.read_iops)
                .field("write_iops", rates.disk.write_iops),
        );

        batch.push(
            self.measurement(NETWORK_ACTIVITY, now)
                .field("sent_mb_s", rates.network.sent_mb_s)
                .field("recv_mb_s", rates.network.recv_mb_s)
                .field("packets_sent", rates.network.packets_sent_s)
                .field("packets_recv", rates.network.packets_recv_s)
                .field("err_in", rates.network.errors_in_s)
                .field("err_out", rates.network.errors_out_s),
        );

        for process in current.live_processes() {
            batch.push(
                self.measurement(PROCESS_INFO, now)
                    .tag(TAG_PID, process.pid.to_string())
                    .tag(TAG_NAME, process.name.as_str())
                    .field("cpu_pct", process.cpu_pct)
                    .field("mem_pct", process.mem_pct),
            );
        }

        let load = current.load.unwrap_or_default();
        batch.push(
            self.measurement(SYSTEM_LOAD, now)
                .field("load_1m", load.one)
                .field("load_5m", load.five)
                .field("load_15m", load.fifteen),
        );

        batch.push(self.measurement(SYSTEM_UPTIME, now).field("uptime_s", current.uptime_secs as f64));

        batch
    }

    /// Tick every interval until `token` is cancelled.
    ///
    /// A tick in flight when cancellation arrives is abandoned at its next
    /// await point.
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Sampler started for host {}", self.hostname);

        if let Some(exporter) = &self.exporter {
            if let Err(e) = exporter.remove_stale_temp_files().await {
                warn!("Unable to clean export directory: {}", e);
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        report = self.tick_at(Utc::now()) => debug!(?report, "Tick complete"),
                    }
                }
            }
        }

        self.set_state(SamplerState::Stopped);
        info!("Sampler stopped");
    }
}
