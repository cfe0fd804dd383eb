//! Integration tests for the SystemPulse agent
//!
//! These drive the sampler tick by tick against a scripted counter source
//! and an in-memory sink, then read the results back through the exporter
//! and the HTTP router.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

use pulse_agent::{
    alerts::AlertRule,
    config::ServerConfig,
    error::{CollectorError, CollectorResult, NotifyResult, SinkError, SinkResult},
    exporter::SnapshotExporter,
    measurement::{FlatRow, Measurement, CPU_INFO, CPU_USAGE, PROCESS_INFO, SYSTEM_UPTIME},
    metrics::AgentMetrics,
    notifier::{NotificationDispatcher, Notifier},
    sampler::{Sampler, SamplerState},
    server::{self, AppState},
    sink::{MeasurementSink, MemorySink, TimeRange},
    snapshot::{CounterSnapshot, CounterSource, CpuIdentity, ProcessProbe, ProcessSample},
};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    base_time() + chrono::Duration::seconds(secs)
}

/// Snapshot whose cumulative counters grow linearly with `step`
fn snapshot(step: u64, cpu_pct: f64, processes: Vec<ProcessProbe>) -> CounterSnapshot {
    let mut snapshot = CounterSnapshot::empty(at(step as i64 * 5));
    snapshot.cpu_pct = cpu_pct;
    snapshot.memory.total_bytes = 8 * 1024 * 1024 * 1024;
    snapshot.memory.used_bytes = 2 * 1024 * 1024 * 1024;
    snapshot.memory.used_pct = 25.0;
    snapshot.disk.read_bytes = step * 10 * 1024 * 1024;
    snapshot.disk.write_bytes = step * 5 * 1024 * 1024;
    snapshot.disk.read_ops = step * 100;
    snapshot.disk.write_ops = step * 50;
    snapshot.network.bytes_sent = step * 1024 * 1024;
    snapshot.network.bytes_recv = step * 2 * 1024 * 1024;
    snapshot.uptime_secs = 1000 + step * 5;
    snapshot.processes = processes;
    snapshot
}

fn alive(pid: u32, name: &str, cpu_pct: f64) -> ProcessProbe {
    ProcessProbe::Alive(ProcessSample {
        pid,
        name: name.to_string(),
        cpu_pct,
        mem_pct: 1.0,
    })
}

/// Counter source that replays a fixed script
struct ScriptedSource {
    script: VecDeque<CounterSnapshot>,
}

impl ScriptedSource {
    fn new(script: Vec<CounterSnapshot>) -> Box<Self> {
        Box::new(Self { script: script.into() })
    }
}

#[async_trait]
impl CounterSource for ScriptedSource {
    async fn capture(&mut self) -> CollectorResult<CounterSnapshot> {
        self.script.pop_front().ok_or_else(|| CollectorError::Unavailable {
            reason: "script exhausted".to_string(),
        })
    }

    async fn cpu_identity(&mut self) -> CollectorResult<CpuIdentity> {
        Ok(CpuIdentity {
            brand: "Test CPU".to_string(),
            physical_cores: 4,
            logical_cores: 8,
            frequency_mhz: 3200,
        })
    }
}

/// Sink that rejects every write of one stream and stores the rest
struct PickySink {
    inner: MemorySink,
    reject: &'static str,
}

#[async_trait]
impl MeasurementSink for PickySink {
    async fn write(&self, measurement: &Measurement) -> SinkResult<()> {
        if measurement.stream == self.reject {
            return Err(SinkError::Rejected {
                status: 400,
                body: "bad point".to_string(),
            });
        }
        self.inner.write(measurement).await
    }

    async fn query(&self, range: TimeRange) -> SinkResult<Vec<FlatRow>> {
        self.inner.query(range).await
    }

    async fn health(&self) -> SinkResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "picky"
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> NotifyResult<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn sampler_over(source: Box<ScriptedSource>, sink: Arc<dyn MeasurementSink>) -> (Sampler, Arc<AgentMetrics>) {
    let metrics = Arc::new(AgentMetrics::new().unwrap());
    let sampler = Sampler::new(source, sink, metrics.clone())
        .with_hostname("web-1")
        .with_interval(Duration::from_secs(5));
    (sampler, metrics)
}

#[tokio::test]
async fn test_n_ticks_write_n_batches_and_one_static_row() {
    let sink = Arc::new(MemorySink::new());
    let script = (0..4).map(|step| snapshot(step, 10.0, vec![alive(1, "init", 0.1)])).collect();
    let (mut sampler, metrics) = sampler_over(ScriptedSource::new(script), sink.clone());

    for step in 0..4 {
        sampler.tick_at(at(step * 5)).await;
    }

    // One warm-up tick, then three sampling ticks
    assert_eq!(sink.count(CPU_INFO).await, 1);
    assert_eq!(sink.count(CPU_USAGE).await, 3);
    assert_eq!(sink.count(SYSTEM_UPTIME).await, 3);
    assert_eq!(sink.count(PROCESS_INFO).await, 3);
    assert_eq!(sink.len().await, 1 + 3 * 7);
    assert_eq!(metrics.stats().ticks, 4);

    // Every row carries the host tag and the tick timestamp
    let rows = sink.query(TimeRange::new(at(0), at(15))).await.unwrap();
    assert!(rows.iter().all(|row| row.tag("hostname") == Some("web-1")));
    assert!(rows
        .iter()
        .filter(|row| row.measurement == CPU_USAGE)
        .all(|row| row.time == at(5) || row.time == at(10) || row.time == at(15)));

    // 10 MiB read per 5 s step is 2 MiB/s
    let read_rate = rows
        .iter()
        .find(|row| row.measurement == "disk_io" && row.field == "read_mb_s")
        .unwrap();
    assert!((read_rate.value - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_export_after_interval_elapses() {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let script = (0..3).map(|step| snapshot(step, 10.0, Vec::new())).collect();
    let (sampler, metrics) = sampler_over(ScriptedSource::new(script), sink.clone());
    let mut sampler = sampler.with_exporter(
        SnapshotExporter::new(temp_dir.path(), Duration::from_secs(60)),
        Duration::from_secs(5),
    );

    assert!(sampler.tick_at(at(0)).await.export.is_none());
    let report = sampler.tick_at(at(5)).await;

    let path = report.export.expect("export due after one interval");
    assert_eq!(path.file_name().unwrap(), "metrics_20240501_120005.txt");

    let rows: Vec<FlatRow> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(rows.iter().any(|row| row.measurement == CPU_INFO));
    assert!(rows.iter().any(|row| row.measurement == CPU_USAGE && row.value == 10.0));

    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    assert_eq!(metrics.stats().exports, 1);
}

#[tokio::test]
async fn test_vanished_process_is_skipped() {
    let sink = Arc::new(MemorySink::new());
    let script = vec![
        snapshot(0, 5.0, vec![alive(1, "init", 0.1), alive(77, "short-lived", 3.0)]),
        snapshot(1, 5.0, vec![alive(1, "init", 0.1), ProcessProbe::Vanished { pid: 77 }]),
    ];
    let (mut sampler, metrics) = sampler_over(ScriptedSource::new(script), sink.clone());

    sampler.tick_at(at(0)).await;
    let report = sampler.tick_at(at(5)).await;

    assert!(report.captured);
    assert_eq!(report.processes_skipped, 1);
    assert_eq!(sink.count(PROCESS_INFO).await, 1);
    assert_eq!(metrics.counters().processes_skipped.get(), 1);
}

#[tokio::test]
async fn test_rejected_writes_do_not_abort_tick() {
    let sink = Arc::new(PickySink {
        inner: MemorySink::new(),
        reject: CPU_USAGE,
    });
    let script = (0..2).map(|step| snapshot(step, 10.0, Vec::new())).collect();
    let (mut sampler, metrics) = sampler_over(ScriptedSource::new(script), sink.clone());

    sampler.tick_at(at(0)).await;
    let report = sampler.tick_at(at(5)).await;

    assert_eq!(report.state, SamplerState::Sampling);
    assert_eq!(report.rows_failed, 1);
    assert_eq!(report.rows_written, 5);
    assert_eq!(sink.inner.count(SYSTEM_UPTIME).await, 1);
    assert_eq!(metrics.stats().write_errors, 1);
}

#[tokio::test]
async fn test_alert_reaches_notifier() {
    let sink = Arc::new(MemorySink::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let script = vec![snapshot(0, 20.0, Vec::new()), snapshot(1, 95.0, Vec::new())];
    let (sampler, metrics) = sampler_over(ScriptedSource::new(script), sink);
    let dispatcher = NotificationDispatcher::new(notifier.clone(), Duration::from_secs(1)).with_metrics(metrics.clone());
    let mut sampler = sampler
        .with_rules(vec![AlertRule::above("cpu_usage", 72.0)])
        .with_dispatcher(dispatcher);

    sampler.tick_at(at(0)).await;
    let report = sampler.tick_at(at(5)).await;
    assert_eq!(report.notifications, 1);

    // Delivery runs on its own task
    for _ in 0..50 {
        if !notifier.messages.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("ALERT: cpu_usage is 95.0"));
    assert_eq!(metrics.stats().alerts_fired, 1);
}

#[tokio::test]
async fn test_processes_endpoint_over_sampled_data() {
    let sink = Arc::new(MemorySink::new());
    let now = Utc::now();
    let script = vec![
        snapshot(0, 5.0, Vec::new()),
        snapshot(1, 5.0, vec![alive(300, "postgres", 12.5), alive(20, "nginx", 40.0)]),
    ];
    let (mut sampler, metrics) = sampler_over(ScriptedSource::new(script), sink.clone());

    sampler.tick_at(now - chrono::Duration::seconds(5)).await;
    sampler.tick_at(now).await;

    let (_tx, rx) = watch::channel(sampler.state());
    let app = server::router(
        AppState {
            sink,
            metrics,
            sampler_state: rx,
            query_window: Duration::from_secs(60),
            #[cfg(feature = "email")]
            email: None,
        },
        &ServerConfig::default(),
    );

    let response = app
        .oneshot(Request::builder().uri("/processes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    let processes = body["processes"].as_array().unwrap();
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[0]["pid"], 20);
    assert_eq!(processes[0]["name"], "nginx");
    assert_eq!(processes[1]["pid"], 300);
    assert_eq!(processes[1]["cpu_pct"], 12.5);
}
