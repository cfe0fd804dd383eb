use crate::api::{MetricRow, PulseClient};
use crate::error::Result;
use crate::output::OutputManager;
use clap::Args;

#[derive(Args, Debug)]
pub struct MetricsArgs {
    /// Only rows of this measurement (cpu_usage, memory_usage, ...)
    #[arg(long, short)]
    pub measurement: Option<String>,

    /// Only rows of this field
    #[arg(long, short)]
    pub field: Option<String>,
}

pub async fn run(args: MetricsArgs, client: PulseClient, output: OutputManager) -> Result<()> {
    let spinner = output.create_spinner("Fetching recent measurements...");
    let rows = client.metrics().await;
    spinner.finish_and_clear();

    let rows = filter_rows(rows?, args.measurement.as_deref(), args.field.as_deref());
    output.print_metrics(&rows)
}

/// Keep rows matching the optional measurement and field filters
pub fn filter_rows(rows: Vec<MetricRow>, measurement: Option<&str>, field: Option<&str>) -> Vec<MetricRow> {
    rows.into_iter()
        .filter(|row| measurement.map_or(true, |m| row.measurement == m))
        .filter(|row| field.map_or(true, |f| row.field == f))
        .collect()
}
