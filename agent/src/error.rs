//! Error handling for the SystemPulse agent
//!
//! Every area of the agent (counter collection, the measurement sink,
//! notification delivery, snapshot export, configuration) has its own error
//! enum. `AgentError` wraps them all so the service layer can categorize and
//! log failures uniformly.

use std::io;

use thiserror::Error;

/// The main error type for the agent
#[derive(Error, Debug)]
pub enum AgentError {
    /// Counter collection errors
    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),

    /// Measurement sink errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// Snapshot export errors
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Self-metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Counter snapshot collection errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectorError {
    #[error("Snapshot capture failed: {reason}")]
    CaptureFailed { reason: String },

    #[error("Process {pid} vanished during scan")]
    ProcessVanished { pid: u32 },

    #[error("Counter source unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Measurement sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Sink query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Sink unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Sink rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed sink response: {reason}")]
    MalformedResponse { reason: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Notification delivery errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification transport not configured: {transport}")]
    NotConfigured { transport: String },

    #[error("Notification delivery failed via {transport}: {reason}")]
    DeliveryFailed { transport: String, reason: String },

    #[error("Notification delivery timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Notification queue closed")]
    QueueClosed,

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Snapshot export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export directory creation failed: {path}")]
    DirectoryCreationFailed { path: String },

    #[error("Export query failed: {0}")]
    Query(#[from] SinkError),

    #[error("Export write failed for {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Export serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },
}

/// Self-metrics errors
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metrics registration failed: {name}")]
    RegistrationFailed { name: String },

    #[error("Metrics export failed: {reason}")]
    ExportFailed { reason: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AgentError>;

/// A specialized result type for counter collection
pub type CollectorResult<T> = std::result::Result<T, CollectorError>;

/// A specialized result type for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// A specialized result type for notification delivery
pub type NotifyResult<T> = std::result::Result<T, NotifyError>;

/// A specialized result type for snapshot export
pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for metrics operations
pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

impl AgentError {
    /// Check if this error is recoverable
    ///
    /// Transient I/O against the store, the notifier or the counter source is
    /// recoverable; configuration errors are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AgentError::Config(_) => false,
            AgentError::Metrics(MetricsError::RegistrationFailed { .. }) => false,
            AgentError::Collector(CollectorError::Unavailable { .. }) => false,
            AgentError::Export(ExportError::DirectoryCreationFailed { .. }) => false,
            AgentError::Io(io_error) => {
                matches!(io_error.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
            }
            _ => true,
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::Collector(_) => "collector",
            AgentError::Sink(_) => "sink",
            AgentError::Notify(_) => "notify",
            AgentError::Export(_) => "export",
            AgentError::Config(_) => "config",
            AgentError::Metrics(_) => "metrics",
            AgentError::Io(_) => "io",
            AgentError::Serialization(_) => "serialization",
            AgentError::Http(_) => "http",
            AgentError::Generic(_) => "generic",
        }
    }
}

impl From<String> for AgentError {
    fn from(msg: String) -> Self {
        AgentError::Generic(msg)
    }
}

impl From<&str> for AgentError {
    fn from(msg: &str) -> Self {
        AgentError::Generic(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let sink_error = AgentError::Sink(SinkError::WriteFailed { reason: "timeout".to_string() });
        assert_eq!(sink_error.category(), "sink");
        assert!(sink_error.is_recoverable());

        let config_error = AgentError::Config(ConfigError::InvalidValue {
            field: "sampler.interval_secs".to_string(),
            value: "0".to_string(),
        });
        assert_eq!(config_error.category(), "config");
        assert!(!config_error.is_recoverable());

        let vanished = AgentError::Collector(CollectorError::ProcessVanished { pid: 42 });
        assert_eq!(vanished.category(), "collector");
        assert!(vanished.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let agent_error = AgentError::from("Test error".to_string());
        assert!(matches!(agent_error, AgentError::Generic(_)));

        let agent_error = AgentError::from("Test error");
        assert!(matches!(agent_error, AgentError::Generic(_)));

        let export_error = ExportError::from(SinkError::QueryFailed { reason: "down".to_string() });
        assert!(export_error.to_string().contains("down"));
    }
}
