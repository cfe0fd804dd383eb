//! Agent service
//!
//! Wires the sink, notifier, sampler and HTTP server together and owns their
//! lifecycle. Everything runs on one cancellation token; `stop` cancels it
//! and waits for the sampler and server tasks to finish.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collector::SysinfoSource;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::exporter::SnapshotExporter;
use crate::metrics::AgentMetrics;
use crate::notifier::{self, NotificationDispatcher, Notifier};
use crate::sampler::{Sampler, SamplerState};
use crate::server::{self, AppState};
use crate::sink::{self, MeasurementSink};
use crate::snapshot::CounterSource;

#[cfg(feature = "email")]
use crate::notifier::{EmailNotifier, EmailQueue, SmtpMailer};

/// Service status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Snapshot of the service for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ServiceState {
    pub status: ServiceStatus,
    pub sampler: SamplerState,
    pub started_at: Option<DateTime<Utc>>,
    pub listening_on: Option<SocketAddr>,
    pub last_error: Option<String>,
}

/// Result of a one-off store health check
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub sink: String,
    pub healthy: bool,
    pub detail: Option<String>,
    pub export_directory: PathBuf,
    pub export_writable: bool,
}

/// The running agent
pub struct AgentService {
    config: AgentConfig,
    sink: Arc<dyn MeasurementSink>,
    metrics: Arc<AgentMetrics>,
    state: Arc<RwLock<ServiceState>>,
    sampler_state: Option<watch::Receiver<SamplerState>>,
    token: CancellationToken,
    sampler_task: Option<JoinHandle<()>>,
    server_task: Option<JoinHandle<()>>,
    #[cfg(feature = "email")]
    email: Option<(EmailQueue, JoinHandle<()>)>,
}

impl AgentService {
    /// Create the service with the sink named by configuration
    pub fn new(config: AgentConfig) -> Result<Self> {
        let sink = sink::from_config(&config.store)?;
        Self::with_sink(config, sink)
    }

    /// Create the service around an existing sink
    pub fn with_sink(config: AgentConfig, sink: Arc<dyn MeasurementSink>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(AgentMetrics::new()?);

        let state = Arc::new(RwLock::new(ServiceState {
            status: ServiceStatus::Starting,
            sampler: SamplerState::Warming,
            started_at: None,
            listening_on: None,
            last_error: None,
        }));

        info!("SystemPulse agent initialized with {} sink", sink.name());
        Ok(Self {
            config,
            sink,
            metrics,
            state,
            sampler_state: None,
            token: CancellationToken::new(),
            sampler_task: None,
            server_task: None,
            #[cfg(feature = "email")]
            email: None,
        })
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        self.metrics.clone()
    }

    pub fn sink(&self) -> Arc<dyn MeasurementSink> {
        self.sink.clone()
    }

    /// Start sampling the local host
    pub async fn start(&mut self) -> Result<()> {
        self.start_with_source(Box::new(SysinfoSource::new())).await
    }

    /// Start sampling `source`, and serve HTTP when enabled
    pub async fn start_with_source(&mut self, source: Box<dyn CounterSource>) -> Result<()> {
        info!("Starting SystemPulse agent");

        // An unreachable store is not fatal; writes are retried every tick
        if let Err(e) = self.sink.health().await {
            let e = AgentError::from(e);
            warn!("Measurement store {} is not healthy yet: {}", self.sink.name(), e);
            self.metrics.record_error(&e);
            self.state.write().await.last_error = Some(e.to_string());
        }

        let transports = self.email_transports()?;
        let notifier = notifier::from_config(&self.config.notifier, transports)?;
        let dispatcher = NotificationDispatcher::new(notifier, Duration::from_secs(self.config.notifier.timeout_secs))
            .with_metrics(self.metrics.clone());

        let hostname = self
            .config
            .sampler
            .hostname
            .clone()
            .unwrap_or_else(SysinfoSource::hostname);

        let sampler = Sampler::new(source, self.sink.clone(), self.metrics.clone())
            .configured(&self.config)
            .with_dispatcher(dispatcher)
            .with_hostname(hostname);
        let sampler_state = sampler.subscribe();
        self.sampler_state = Some(sampler_state.clone());

        self.sampler_task = Some(tokio::spawn(sampler.run(self.token.child_token())));

        if self.config.server.enabled {
            let address = self.config.server.socket_address();
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|e| AgentError::Http(format!("failed to bind {}: {}", address, e)))?;
            self.state.write().await.listening_on = Some(listener.local_addr()?);

            let app_state = AppState {
                sink: self.sink.clone(),
                metrics: self.metrics.clone(),
                sampler_state,
                query_window: self.config.server.query_window(),
                #[cfg(feature = "email")]
                email: self.email.as_ref().map(|(queue, _)| queue.clone()),
            };
            let router = server::router(app_state, &self.config.server);
            let token = self.token.child_token();

            self.server_task = Some(tokio::spawn(async move {
                if let Err(e) = server::serve(listener, router, token).await {
                    error!("HTTP server failed: {}", e);
                }
            }));
        }

        {
            let mut state = self.state.write().await;
            state.status = ServiceStatus::Running;
            state.started_at = Some(Utc::now());
        }

        info!("SystemPulse agent started");
        Ok(())
    }

    #[cfg(feature = "email")]
    fn email_transports(&mut self) -> Result<Vec<Arc<dyn Notifier>>> {
        let Some(email) = self.config.notifier.email.clone() else {
            return Ok(Vec::new());
        };

        let mailer = SmtpMailer::from_config(&email)?;
        let (queue, worker) = EmailQueue::start(Arc::new(mailer), email.queue_capacity);
        let notifier: Arc<dyn Notifier> = Arc::new(EmailNotifier::new(queue.clone(), Some(email.alert_recipient)));
        self.email = Some((queue, worker));

        info!("Email notifications enabled via {}", email.smtp_host);
        Ok(vec![notifier])
    }

    #[cfg(not(feature = "email"))]
    fn email_transports(&mut self) -> Result<Vec<Arc<dyn Notifier>>> {
        if self.config.notifier.email.is_some() {
            warn!("Email settings present but the agent was built without the email feature");
        }
        Ok(Vec::new())
    }

    /// Stop sampling and serving, waiting for both to finish
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping SystemPulse agent");
        self.state.write().await.status = ServiceStatus::Stopping;

        self.token.cancel();

        if let Some(task) = self.sampler_task.take() {
            if let Err(e) = task.await {
                error!("Sampler task panicked: {}", e);
            }
        }
        if let Some(task) = self.server_task.take() {
            if let Err(e) = task.await {
                error!("HTTP server task panicked: {}", e);
            }
        }

        // The worker drains what is queued once the last handle is gone
        #[cfg(feature = "email")]
        if let Some((queue, worker)) = self.email.take() {
            drop(queue);
            if tokio::time::timeout(Duration::from_secs(self.config.notifier.timeout_secs), worker)
                .await
                .is_err()
            {
                warn!("Email worker did not drain in time");
            }
        }

        self.state.write().await.status = ServiceStatus::Stopped;
        info!("SystemPulse agent stopped");
        Ok(())
    }

    /// Get service status
    pub async fn get_status(&self) -> ServiceState {
        let mut state = self.state.read().await.clone();
        if let Some(receiver) = &self.sampler_state {
            state.sampler = *receiver.borrow();
        }
        state
    }

    /// Wait for SIGINT or SIGTERM
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl-C");
        }

        Ok(())
    }

    /// Write one snapshot of the trailing `window` without starting the sampler
    pub async fn export_once(config: &AgentConfig, window: Option<Duration>) -> Result<PathBuf> {
        let sink = sink::from_config(&config.store)?;
        let window = window.unwrap_or_else(|| config.export.window());
        let exporter = SnapshotExporter::new(&config.export.directory, window);

        Ok(exporter.export(sink.as_ref(), Utc::now()).await?)
    }

    /// Probe the configured store and the export directory once
    pub async fn check_health(config: &AgentConfig) -> Result<HealthReport> {
        let sink = sink::from_config(&config.store)?;
        let outcome = sink.health().await;
        let directory = config.export.directory.clone();

        Ok(HealthReport {
            sink: sink.name().to_string(),
            healthy: outcome.is_ok(),
            detail: outcome.err().map(|e| e.to_string()),
            export_writable: directory_writable(&directory).await,
            export_directory: directory,
        })
    }
}

async fn directory_writable(directory: &Path) -> bool {
    if tokio::fs::create_dir_all(directory).await.is_err() {
        return false;
    }
    let probe = directory.join(".pulse-agent-probe");
    let writable = tokio::fs::write(&probe, b"").await.is_ok();
    let _ = tokio::fs::remove_file(&probe).await;
    writable
}
