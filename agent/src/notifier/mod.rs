//! Alert delivery
//!
//! A `Notifier` delivers one human-readable message. The sampler never
//! awaits delivery: `NotificationDispatcher` spawns each one on its own task
//! bounded by a timeout, and failures are only logged and counted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alerts::Notification;
use crate::config::NotifierConfig;
use crate::error::{AgentError, NotifyError, NotifyResult};
use crate::metrics::AgentMetrics;

#[cfg(feature = "email")]
pub mod email;
pub mod telegram;

#[cfg(feature = "email")]
pub use email::{EmailNotifier, EmailQueue, EmailRequest, SmtpMailer};
pub use telegram::TelegramNotifier;

/// Delivers alert messages to an operator
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> NotifyResult<()>;

    /// Transport name for logs
    fn name(&self) -> &'static str;
}

/// Writes alerts to the log; used when no transport is configured
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> NotifyResult<()> {
        warn!(target: "pulse_agent::alert", "{}", message);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Delivers to every inner notifier; fails if any of them failed
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, message: &str) -> NotifyResult<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(message).await {
                warn!("Notification via {} failed: {}", notifier.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}

/// Build the notifier described by configuration.
///
/// `extra` holds transports the caller has already started (the email
/// queue). With nothing configured, alerts go to the log.
pub fn from_config(config: &NotifierConfig, extra: Vec<Arc<dyn Notifier>>) -> NotifyResult<Arc<dyn Notifier>> {
    let mut notifiers = extra;

    if let Some(telegram) = config.telegram.as_ref().filter(|t| t.is_configured()) {
        notifiers.push(Arc::new(TelegramNotifier::from_config(telegram)?));
    }

    Ok(match notifiers.len() {
        0 => {
            info!("No notification transport configured, alerts will be logged");
            Arc::new(LogNotifier)
        }
        1 => notifiers.remove(0),
        _ => Arc::new(FanoutNotifier::new(notifiers)),
    })
}

/// Fire-and-forget delivery of notifications
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    metrics: Option<Arc<AgentMetrics>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn delivery of `notification`; the handle is only useful to tests
    pub fn dispatch(&self, notification: &Notification) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let metrics = self.metrics.clone();
        let limit = self.timeout;
        let message = notification.message();

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(limit, notifier.notify(&message)).await {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Timeout { seconds: limit.as_secs() }),
            };

            match outcome {
                Ok(()) => debug!("Notification delivered via {}", notifier.name()),
                Err(e) => {
                    warn!("Notification via {} failed: {}", notifier.name(), e);
                    if let Some(metrics) = metrics {
                        metrics.record_notification_failed();
                        metrics.record_error(&AgentError::from(e));
                    }
                }
            }
        })
    }
}
