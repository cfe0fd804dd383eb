use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {message}")]
    Api { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid snapshot file: {0}")]
    InvalidSnapshot(String),

    #[error("Email notifications are not enabled on the agent")]
    EmailDisabled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl PulseError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PulseError::Config(_) => 1,
            PulseError::Io(_) => 2,
            PulseError::FileNotFound { .. } => 5,
            PulseError::InvalidSnapshot(_) => 6,
            PulseError::Api { .. } => 8,
            PulseError::EmailDisabled => 9,
            PulseError::ServiceUnavailable => 10,
            PulseError::Timeout => 124, // Standard timeout exit code
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;

/// Format error for user-friendly display
pub fn format_error(error: &PulseError) -> String {
    match error {
        PulseError::Config(e) => {
            format!("Configuration Error: {}\n\nCheck ~/.config/pulsectl/config.toml and PULSECTL_* variables.", e)
        }
        PulseError::FileNotFound { path } => {
            format!("File Not Found: {}\n\nSnapshot files are named metrics_YYYYMMDD_HHMMSS.txt.", path)
        }
        PulseError::ServiceUnavailable => {
            "Service Unavailable: the SystemPulse agent is not running or not accessible.\n\nCheck --url or PULSE_URL.".to_string()
        }
        PulseError::EmailDisabled => {
            "Email Disabled: the agent was started without SMTP settings or without the email feature.".to_string()
        }
        _ => error.to_string(),
    }
}
