use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod commands;
mod error;
mod output;
mod settings;

use api::PulseClient;
use commands::*;
use error::Result;
use output::{OutputFormat, OutputManager};
use settings::CliConfig;

#[derive(Parser)]
#[command(name = "pulsectl")]
#[command(about = "SystemPulse CLI - inspect a running agent and its snapshot files")]
#[command(version)]
#[command(long_about = "
SystemPulse CLI (pulsectl) reads the agent's HTTP surface and summarizes the
snapshot files it exports.

Examples:
  pulsectl status                                  # Check agent health
  pulsectl metrics --measurement disk_io           # Recent disk rates
  pulsectl processes --limit 10                    # Top 10 processes by CPU
  pulsectl snapshot exports/metrics_20240101_120000.txt
  pulsectl notify --subject test --body hello      # Send an email via the agent
")]
struct Cli {
    /// Agent URL (overrides config file)
    #[arg(long, global = true, env = "PULSE_URL")]
    url: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: OutputFormatArg,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(long, global = true, env = "PULSECTL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormatArg {
    Table,
    Json,
    Csv,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Csv => OutputFormat::Csv,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check SystemPulse agent status and health
    Status(StatusArgs),

    /// Show measurements from the agent's recent window
    Metrics(MetricsArgs),

    /// Show per-process CPU and memory usage
    Processes(ProcessesArgs),

    /// Send an email through the agent
    Notify(NotifyArgs),

    /// Summarize a snapshot file
    Snapshot(SnapshotArgs),

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(&cli);

    // Handle completion generation
    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return;
    }

    let colored = !cli.no_color && console::Term::stderr().features().colors_supported();
    let reporter = OutputManager::new(OutputFormat::from(cli.format.clone()), colored);

    if let Err(e) = run_command(cli).await {
        let _ = reporter.print_error(&error::format_error(&e));
        process::exit(e.exit_code());
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    let colored = !cli.no_color && console::Term::stdout().features().colors_supported();
    let output = OutputManager::new(OutputFormat::from(cli.format), colored);

    // Snapshot files are read locally; no agent needed
    if let Commands::Snapshot(args) = cli.command {
        return commands::snapshot::run(args, output).await;
    }

    let config = CliConfig::load(cli.config.as_deref())?;
    let url = cli.url.unwrap_or(config.url);
    info!("Connecting to SystemPulse agent at: {}", url);

    let client = PulseClient::new(url)?.with_timeout(Duration::from_secs(config.timeout_secs));

    match cli.command {
        Commands::Status(args) => commands::status::run(args, client, output).await,
        Commands::Metrics(args) => commands::metrics::run(args, client, output).await,
        Commands::Processes(mut args) => {
            args.limit = args.limit.or(config.process_limit);
            commands::processes::run(args, client, output).await
        }
        Commands::Notify(args) => commands::notify::run(args, client, output).await,
        Commands::Snapshot(_) | Commands::Completions { .. } => Ok(()),
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pulsectl={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn generate_completions(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}
