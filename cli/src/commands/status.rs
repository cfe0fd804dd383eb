use crate::api::PulseClient;
use crate::error::Result;
use crate::output::OutputManager;
use clap::Args;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also fetch the process count of the current window
    #[arg(long, short)]
    pub detailed: bool,
}

pub async fn run(args: StatusArgs, client: PulseClient, output: OutputManager) -> Result<()> {
    let spinner = output.create_spinner("Checking SystemPulse agent status...");
    let health = client.health().await;
    spinner.finish_and_clear();

    let health = health?;
    output.print_health_status(&health)?;

    if args.detailed {
        let processes = client.processes(None).await?;
        let rows = client.metrics().await?;
        println!();
        println!("Rows in window: {}", rows.len());
        println!("Processes in window: {}", processes.len());
    }

    if health.status == "ok" {
        output.print_success(&format!("Agent at {} is sampling", client.base_url()))?;
    } else {
        output.print_warning(&format!("Agent reports status '{}'", health.status))?;
    }
    Ok(())
}
