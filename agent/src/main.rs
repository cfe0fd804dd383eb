//! SystemPulse agent entry point
//!
//! Runs the sampler and HTTP surface until SIGINT or SIGTERM, or performs a
//! one-off export or store health check.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::Directive, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pulse_agent::{
    config::{AgentConfig, LoggingConfig},
    error::{AgentError, Result},
    service::AgentService,
};

/// SystemPulse agent command line interface
#[derive(Parser)]
#[command(name = "pulse-agent")]
#[command(about = "SystemPulse host telemetry agent")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overrides the configured one
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default)
    Start,

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Write one snapshot file from the store and exit
    Export {
        /// Window to export in seconds, defaults to export.window_secs
        #[arg(short, long)]
        window: Option<u64>,

        /// Output directory, defaults to export.directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the measurement store is reachable
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging settings live in the configuration, so load it first
    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let _log_guard = match initialize_logging(&cli, &config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Start) | None => start_agent(config).await,
        Some(Commands::Config { show }) => handle_config(&config, show),
        Some(Commands::Export { window, output }) => export_snapshot(config, window, output).await,
        Some(Commands::Health) => health_check(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn directive(raw: &str) -> Result<Directive> {
    raw.parse()
        .map_err(|e| AgentError::Generic(format!("invalid log directive {}: {}", raw, e)))
}

/// Initialize logging from the CLI flags and the logging section
fn initialize_logging(cli: &Cli, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level = cli.log_level.as_deref().unwrap_or(&config.level);
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(directive(&format!("pulse_agent={}", log_level))?)
        .add_directive(directive("tokio=warn")?)
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("reqwest=warn")?)
        .add_directive(directive("mio=warn")?);

    let (file_layer, guard) = match &config.file_path {
        Some(path) => {
            let directory = path.parent().unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| AgentError::Generic(format!("invalid log file path {}", path.display())))?;
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if cli.json_logs || config.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }

    Ok(guard)
}

/// Defaults, then the config file if present, then environment overrides
fn load_configuration(cli: &Cli) -> Result<AgentConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => AgentConfig::default_config_path()?,
    };
    Ok(AgentConfig::load_with_fallback(Some(path))?)
}

/// Run until a shutdown signal arrives
async fn start_agent(config: AgentConfig) -> Result<()> {
    let mut service = AgentService::new(config)?;
    service.start().await?;

    service.wait_for_shutdown().await?;

    info!("Initiating graceful shutdown");
    service.stop().await?;
    Ok(())
}

fn handle_config(config: &AgentConfig, show: bool) -> Result<()> {
    if show {
        let rendered = toml::to_string_pretty(config).map_err(|e| AgentError::Generic(e.to_string()))?;
        println!("Effective configuration:");
        println!("{}", rendered);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

async fn export_snapshot(mut config: AgentConfig, window: Option<u64>, output: Option<PathBuf>) -> Result<()> {
    if let Some(directory) = output {
        config.export.directory = directory;
    }

    let path = AgentService::export_once(&config, window.map(Duration::from_secs)).await?;
    println!("Metrics exported to: {}", path.display());
    Ok(())
}

async fn health_check(config: &AgentConfig) -> Result<()> {
    let report = AgentService::check_health(config).await?;

    println!(
        "Export directory {} is {}",
        report.export_directory.display(),
        if report.export_writable { "writable" } else { "not writable" }
    );

    if report.healthy {
        println!("Measurement store ({}) is healthy", report.sink);
        Ok(())
    } else {
        println!("Measurement store ({}) is unhealthy", report.sink);
        Err(AgentError::Generic(report.detail.unwrap_or_else(|| "unknown failure".to_string())))
    }
}
