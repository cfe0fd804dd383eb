//! Configuration management for the SystemPulse agent
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables. The environment variable names are the ones
//! operators already use for the InfluxDB and SMTP settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerts::AlertRule;
use crate::error::{ConfigError, ConfigResult};
use crate::normalizer::ResetPolicy;

/// Main configuration structure for the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Measurement store
    pub store: StoreConfig,

    /// Sampling loop
    pub sampler: SamplerConfig,

    /// Alert rules
    pub alerts: AlertsConfig,

    /// Snapshot export
    pub export: ExportConfig,

    /// Alert delivery
    pub notifier: NotifierConfig,

    /// HTTP surface
    pub server: ServerConfig,

    /// Logging
    pub logging: LoggingConfig,
}

/// Which sink implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Influx,
    Memory,
}

/// Measurement store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// InfluxDB base URL
    pub url: String,

    /// InfluxDB API token
    pub token: String,

    pub org: String,
    pub bucket: String,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

/// Sampling loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Seconds between ticks
    pub interval_secs: u64,

    /// Elapsed-time floor used when the clock did not advance
    pub rate_floor_secs: u64,

    /// Handling of counters that go backwards
    pub reset_policy: ResetPolicy,

    /// Overrides the OS host name in the `hostname` tag
    pub hostname: Option<String>,
}

/// Alert configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub rules: Vec<AlertRule>,
}

/// Snapshot export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,

    /// Directory receiving `metrics_*.txt` files
    pub directory: PathBuf,

    /// Seconds between exports
    pub interval_secs: u64,

    /// Trailing window exported each time, in seconds
    pub window_secs: u64,
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Upper bound on one delivery, in seconds
    pub timeout_secs: u64,

    pub telegram: Option<TelegramConfig>,

    pub email: Option<EmailConfig>,
}

/// Telegram Bot API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

/// SMTP settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,

    /// Default recipient for alerts and for requests without `to`
    pub alert_recipient: String,

    pub timeout_secs: u64,

    /// Pending emails held before new ones are refused
    pub queue_capacity: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,

    /// Window served by `/metrics` and `/processes`, in seconds
    pub query_window_secs: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Allow cross-origin reads, for browser dashboards
    pub allow_cors: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Also write to this file, rotated daily
    pub file_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Influx,
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "SystemPulseOrg".to_string(),
            bucket: "system_metrics_bucket".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            rate_floor_secs: 1,
            reset_policy: ResetPolicy::PassThrough,
            hostname: None,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rules: vec![AlertRule::above("cpu_usage", 80.0), AlertRule::above("memory_usage", 90.0)],
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("exports"),
            interval_secs: 300,
            window_secs: 300,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            telegram: None,
            email: None,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            smtp_user: String::new(),
            smtp_pass: String::new(),
            alert_recipient: "alert@example.com".to_string(),
            timeout_secs: 30,
            queue_capacity: 64,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            query_window_secs: 60,
            request_timeout_secs: 30,
            allow_cors: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_path: None,
        }
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ExportConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl ServerConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn query_window(&self) -> Duration {
        Duration::from_secs(self.query_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_env<T: FromStr>(name: &str, raw: String) -> ConfigResult<T> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        value: raw,
    })
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        })?;

        let config: AgentConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = AgentConfig::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback order: defaults -> file -> env
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = AgentConfig::default();

        if let Some(path) = config_path {
            if path.as_ref().exists() {
                config = AgentConfig::from_file(path)?;
            }
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(url) = lookup("INFLUXDB_URL") {
            self.store.url = url;
        }
        if let Some(token) = lookup("INFLUXDB_TOKEN") {
            self.store.token = token;
        }
        if let Some(org) = lookup("INFLUXDB_ORG") {
            self.store.org = org;
        }
        if let Some(bucket) = lookup("INFLUXDB_BUCKET") {
            self.store.bucket = bucket;
        }

        if let Some(raw) = lookup("SAMPLE_INTERVAL_SECS") {
            self.sampler.interval_secs = parse_env("SAMPLE_INTERVAL_SECS", raw)?;
        }
        if let Some(raw) = lookup("CPU_ALERT_THRESHOLD") {
            let threshold = parse_env("CPU_ALERT_THRESHOLD", raw)?;
            self.set_threshold("cpu_usage", threshold);
        }
        if let Some(raw) = lookup("MEM_ALERT_THRESHOLD") {
            let threshold = parse_env("MEM_ALERT_THRESHOLD", raw)?;
            self.set_threshold("memory_usage", threshold);
        }

        if let Some(raw) = lookup("EXPORT_INTERVAL_SECS") {
            self.export.interval_secs = parse_env("EXPORT_INTERVAL_SECS", raw)?;
        }
        if let Some(raw) = lookup("EXPORT_WINDOW_SECS") {
            self.export.window_secs = parse_env("EXPORT_WINDOW_SECS", raw)?;
        }
        if let Some(dir) = lookup("EXPORT_DIR") {
            self.export.directory = PathBuf::from(dir);
        }

        let smtp_vars = ["SMTP_HOST", "SMTP_PORT", "SMTP_USER", "SMTP_PASS", "ALERT_EMAIL"];
        if smtp_vars.iter().any(|name| lookup(name).is_some()) {
            let email = self.notifier.email.get_or_insert_with(EmailConfig::default);
            if let Some(host) = lookup("SMTP_HOST") {
                email.smtp_host = host;
            }
            if let Some(raw) = lookup("SMTP_PORT") {
                email.smtp_port = parse_env("SMTP_PORT", raw)?;
            }
            if let Some(user) = lookup("SMTP_USER") {
                email.smtp_user = user;
            }
            if let Some(pass) = lookup("SMTP_PASS") {
                email.smtp_pass = pass;
            }
            if let Some(to) = lookup("ALERT_EMAIL") {
                email.alert_recipient = to;
            }
        }

        if let (Some(bot_token), Some(chat_id)) = (lookup("TELEGRAM_BOT_TOKEN"), lookup("TELEGRAM_CHAT_ID")) {
            let telegram = self.notifier.telegram.get_or_insert_with(TelegramConfig::default);
            telegram.bot_token = bot_token;
            telegram.chat_id = chat_id;
        }

        if let Some(address) = lookup("PULSE_BIND_ADDRESS") {
            self.server.bind_address = address;
        }
        if let Some(raw) = lookup("PULSE_PORT") {
            self.server.port = parse_env("PULSE_PORT", raw)?;
        }
        if let Some(level) = lookup("PULSE_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Replace the threshold of the rule for `metric`, adding one if missing
    fn set_threshold(&mut self, metric: &str, threshold: f64) {
        match self.alerts.rules.iter_mut().find(|rule| rule.metric == metric) {
            Some(rule) => rule.threshold = threshold,
            None => self.alerts.rules.push(AlertRule::above(metric, threshold)),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("sampler.interval_secs", self.sampler.interval_secs),
            ("sampler.rate_floor_secs", self.sampler.rate_floor_secs),
            ("export.interval_secs", self.export.interval_secs),
            ("export.window_secs", self.export.window_secs),
            ("notifier.timeout_secs", self.notifier.timeout_secs),
            ("server.query_window_secs", self.server.query_window_secs),
            ("store.timeout_secs", self.store.timeout_secs),
            ("server.request_timeout_secs", self.server.request_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                });
            }
        }

        for rule in &self.alerts.rules {
            if rule.metric.is_empty() || !rule.threshold.is_finite() {
                return Err(ConfigError::InvalidValue {
                    field: "alerts.rules".to_string(),
                    value: format!("{} {}", rule.metric, rule.threshold),
                });
            }
        }

        if self.store.backend == StoreBackend::Influx {
            if !self.store.url.starts_with("http://") && !self.store.url.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    field: "store.url".to_string(),
                    value: self.store.url.clone(),
                });
            }
            if self.store.org.is_empty() || self.store.bucket.is_empty() {
                return Err(ConfigError::ValidationFailed {
                    reason: "store.org and store.bucket are required for the influx backend".to_string(),
                });
            }
        }

        if let Some(email) = &self.notifier.email {
            if email.smtp_host.is_empty() || email.smtp_port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "notifier.email.smtp_host".to_string(),
                    value: format!("{}:{}", email.smtp_host, email.smtp_port),
                });
            }
        }

        if self.server.enabled && self.server.bind_address.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.bind_address".to_string(),
                value: String::new(),
            });
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("systempulse").join("agent.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content).map_err(|_| ConfigError::PermissionDenied {
            path: path.to_string_lossy().to_string(),
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampler.interval(), Duration::from_secs(5));
        assert_eq!(config.export.window(), Duration::from_secs(300));
        assert_eq!(config.server.socket_address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();
        config.sampler.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.alerts.rules.push(AlertRule::above("cpu_usage", f64::NAN));
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.store.bucket.clear();
        assert!(config.validate().is_err());
        config.store.backend = StoreBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AgentConfig::default();
        config
            .apply_env(env(&[
                ("INFLUXDB_URL", "http://influx:8086"),
                ("INFLUXDB_BUCKET", "hosts"),
                ("CPU_ALERT_THRESHOLD", "72"),
                ("SAMPLE_INTERVAL_SECS", "10"),
                ("EXPORT_DIR", "/var/lib/pulse"),
                ("SMTP_HOST", "mail.local"),
                ("ALERT_EMAIL", "ops@example.com"),
                ("TELEGRAM_BOT_TOKEN", "abc"),
                ("TELEGRAM_CHAT_ID", "42"),
                ("PULSE_PORT", "9100"),
            ]))
            .unwrap();

        assert_eq!(config.store.url, "http://influx:8086");
        assert_eq!(config.store.bucket, "hosts");
        assert_eq!(config.sampler.interval_secs, 10);
        assert_eq!(config.export.directory, PathBuf::from("/var/lib/pulse"));
        assert_eq!(config.server.port, 9100);

        let cpu_rule = config.alerts.rules.iter().find(|r| r.metric == "cpu_usage").unwrap();
        assert_eq!(cpu_rule.threshold, 72.0);
        assert_eq!(config.alerts.rules.len(), 2);

        let email = config.notifier.email.as_ref().unwrap();
        assert_eq!(email.smtp_host, "mail.local");
        assert_eq!(email.smtp_port, 587);
        assert_eq!(email.alert_recipient, "ops@example.com");
        assert!(config.notifier.telegram.as_ref().unwrap().is_configured());
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let mut config = AgentConfig::default();
        let err = config.apply_env(env(&[("SMTP_PORT", "smtp")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "SMTP_PORT"));
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = AgentConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.notifier.telegram = Some(TelegramConfig {
            bot_token: "t".to_string(),
            chat_id: "c".to_string(),
            ..TelegramConfig::default()
        });
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded = AgentConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(
            temp_file.path(),
            "[sampler]\ninterval_secs = 2\n\n[[alerts.rules]]\nmetric = \"disk_write_mb_s\"\nthreshold = 50.0\n",
        )
        .unwrap();

        let config = AgentConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.sampler.interval_secs, 2);
        assert_eq!(config.sampler.rate_floor_secs, 1);
        assert_eq!(config.alerts.rules, vec![AlertRule::above("disk_write_mb_s", 50.0)]);
        assert_eq!(config.server.port, 8000);
    }
}
