//! SMTP email transport
//!
//! Deliveries go through a bounded queue drained by one worker task, so
//! neither the sampler nor the HTTP handler ever waits on SMTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Notifier;
use crate::config::EmailConfig;
use crate::error::{NotifyError, NotifyResult};

const ALERT_SUBJECT: &str = "SystemPulse alert";

/// One email to send; `to` falls back to the configured alert recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub to: Option<String>,
}

/// Something that can deliver an `EmailRequest`
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, request: &EmailRequest) -> NotifyResult<()>;
}

fn smtp_error(reason: impl ToString) -> NotifyError {
    NotifyError::DeliveryFailed {
        transport: "email".to_string(),
        reason: reason.to_string(),
    }
}

/// SMTP over STARTTLS with login credentials
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    default_to: String,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailConfig) -> NotifyResult<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(smtp_error)?
            .port(config.smtp_port)
            .credentials(Credentials::new(config.smtp_user.clone(), config.smtp_pass.clone()))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self {
            transport,
            from: config.smtp_user.parse().map_err(smtp_error)?,
            default_to: config.alert_recipient.clone(),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpMailer {
    async fn send(&self, request: &EmailRequest) -> NotifyResult<()> {
        let to = request.to.as_deref().unwrap_or(&self.default_to);
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().map_err(smtp_error)?)
            .subject(request.subject.as_str())
            .body(request.body.clone())
            .map_err(smtp_error)?;

        self.transport.send(message).await.map_err(smtp_error)?;
        Ok(())
    }
}

/// Handle for enqueueing emails
#[derive(Clone)]
pub struct EmailQueue {
    tx: mpsc::Sender<EmailRequest>,
}

impl EmailQueue {
    /// Start the delivery worker. It exits once every queue handle is dropped.
    pub fn start(sender: Arc<dyn EmailSender>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<EmailRequest>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match sender.send(&request).await {
                    Ok(()) => debug!("Email sent: {}", request.subject),
                    Err(e) => warn!("Email delivery failed: {}", e),
                }
            }
            info!("Email worker stopped");
        });

        (Self { tx }, worker)
    }

    /// Queue an email without waiting for delivery
    pub fn enqueue(&self, request: EmailRequest) -> NotifyResult<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => smtp_error("email queue is full"),
            mpsc::error::TrySendError::Closed(_) => NotifyError::QueueClosed,
        })
    }
}

/// Alert transport that enqueues an email per notification
pub struct EmailNotifier {
    queue: EmailQueue,
    recipient: Option<String>,
}

impl EmailNotifier {
    pub fn new(queue: EmailQueue, recipient: Option<String>) -> Self {
        Self { queue, recipient }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, message: &str) -> NotifyResult<()> {
        self.queue.enqueue(EmailRequest {
            subject: ALERT_SUBJECT.to_string(),
            body: message.to_string(),
            to: self.recipient.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<EmailRequest>>,
    }

    #[async_trait]
    impl EmailSender for Recording {
        async fn send(&self, request: &EmailRequest) -> NotifyResult<()> {
            self.sent.lock().await.push(request.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let recording = Arc::new(Recording::default());
        let (queue, worker) = EmailQueue::start(recording.clone(), 8);

        let notifier = EmailNotifier::new(queue.clone(), Some("ops@example.com".to_string()));
        notifier.notify("cpu_usage is 95.0").await.unwrap();
        queue
            .enqueue(EmailRequest {
                subject: "manual".to_string(),
                body: "hello".to_string(),
                to: None,
            })
            .unwrap();

        drop(notifier);
        drop(queue);
        worker.await.unwrap();

        let sent = recording.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, ALERT_SUBJECT);
        assert_eq!(sent[0].to.as_deref(), Some("ops@example.com"));
        assert_eq!(sent[1].subject, "manual");
    }

    #[test]
    fn test_request_to_is_optional() {
        let request: EmailRequest = serde_json::from_str(r#"{"subject":"s","body":"b"}"#).unwrap();
        assert!(request.to.is_none());
    }
}
