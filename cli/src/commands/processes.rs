use crate::api::PulseClient;
use crate::error::Result;
use crate::output::OutputManager;
use clap::Args;

#[derive(Args, Debug)]
pub struct ProcessesArgs {
    /// Show only the top N processes by CPU
    #[arg(long, short)]
    pub limit: Option<usize>,
}

pub async fn run(args: ProcessesArgs, client: PulseClient, output: OutputManager) -> Result<()> {
    let spinner = output.create_spinner("Fetching processes...");
    let processes = client.processes(args.limit).await;
    spinner.finish_and_clear();

    output.print_processes(&processes?)
}
