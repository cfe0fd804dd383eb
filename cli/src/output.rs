use crate::api::{HealthStatus, MetricRow, ProcessRecord};
use crate::commands::snapshot::FieldSummary;
use crate::error::Result;
use console::{style, Style};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

pub struct OutputManager {
    format: OutputFormat,
    colored: bool,
}

impl OutputManager {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    pub fn print_health_status(&self, status: &HealthStatus) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(status)?);
            }
            OutputFormat::Csv => {
                write_csv(std::slice::from_ref(status))?;
            }
            OutputFormat::Table => {
                let status_color = match status.status.as_str() {
                    "ok" => Style::new().green(),
                    "stopping" => Style::new().yellow(),
                    _ => Style::new().red(),
                };

                if self.colored {
                    println!("{}", style("SystemPulse Agent").bold().underlined());
                    println!("{}: {}", style("Status").bold(), status_color.apply_to(&status.status));
                    println!("{}: {}", style("Sampler").bold(), style(&status.state).cyan());
                    println!("{}: {}", style("Ticks").bold(), status.ticks);
                    println!("{}: {}", style("Uptime").bold(), format_duration(status.uptime_s));
                } else {
                    println!("SystemPulse Agent");
                    println!("Status: {}", status.status);
                    println!("Sampler: {}", status.state);
                    println!("Ticks: {}", status.ticks);
                    println!("Uptime: {}", format_duration(status.uptime_s));
                }
            }
        }
        Ok(())
    }

    pub fn print_metrics(&self, rows: &[MetricRow]) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(rows)?);
            }
            OutputFormat::Csv => {
                // Tag sets vary per measurement, so they share one column
                let mut writer = csv::Writer::from_writer(io::stdout());
                writer.write_record(["time", "measurement", "field", "value", "tags"])?;
                for row in rows {
                    writer.write_record([
                        row.time.to_rfc3339(),
                        row.measurement.clone(),
                        row.field.clone(),
                        row.value.to_string(),
                        format_tags(row),
                    ])?;
                }
                writer.flush()?;
            }
            OutputFormat::Table => {
                if rows.is_empty() {
                    self.print_warning("No measurements in the current window")?;
                    return Ok(());
                }

                self.print_heading("Measurements");
                println!("{:<20} {:<18} {:<16} {:>14}  {}", "Time", "Measurement", "Field", "Value", "Tags");
                println!("{:-<20} {:-<18} {:-<16} {:->14}  {:-<30}", "", "", "", "", "");
                for row in rows {
                    let time = row.time.format("%Y-%m-%d %H:%M:%S").to_string();
                    let value = format!("{:.2}", row.value);
                    if self.colored {
                        println!(
                            "{:<20} {:<18} {:<16} {:>14}  {}",
                            style(&time).dim(),
                            style(&row.measurement).cyan(),
                            row.field,
                            style(&value).green(),
                            format_tags(row)
                        );
                    } else {
                        println!(
                            "{:<20} {:<18} {:<16} {:>14}  {}",
                            time,
                            row.measurement,
                            row.field,
                            value,
                            format_tags(row)
                        );
                    }
                }
                println!("\nTotal: {} rows", rows.len());
            }
        }
        Ok(())
    }

    pub fn print_processes(&self, processes: &[ProcessRecord]) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(processes)?);
            }
            OutputFormat::Csv => {
                write_csv(processes)?;
            }
            OutputFormat::Table => {
                if processes.is_empty() {
                    self.print_warning("No processes in the current window")?;
                    return Ok(());
                }

                self.print_heading("Processes");
                println!("{:>8} {:<32} {:>8} {:>8}", "PID", "Name", "CPU %", "MEM %");
                println!("{:->8} {:-<32} {:->8} {:->8}", "", "", "", "");
                for process in processes {
                    let cpu = format!("{:.1}", process.cpu_pct);
                    if self.colored {
                        println!(
                            "{:>8} {:<32} {:>8} {:>8.1}",
                            process.pid,
                            style(truncate(&process.name, 32)).green(),
                            style(&cpu).yellow(),
                            process.mem_pct
                        );
                    } else {
                        println!(
                            "{:>8} {:<32} {:>8} {:>8.1}",
                            process.pid,
                            truncate(&process.name, 32),
                            cpu,
                            process.mem_pct
                        );
                    }
                }
            }
        }
        Ok(())
    }

    pub fn print_summaries(&self, summaries: &[FieldSummary]) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(summaries)?);
            }
            OutputFormat::Csv => {
                write_csv(summaries)?;
            }
            OutputFormat::Table => {
                if summaries.is_empty() {
                    self.print_warning("Snapshot holds no matching rows")?;
                    return Ok(());
                }

                self.print_heading("Snapshot Summary");
                println!(
                    "{:<18} {:<16} {:>6} {:>12} {:>12} {:>12} {:>12}",
                    "Measurement", "Field", "Count", "Min", "Avg", "Max", "Latest"
                );
                println!("{:-<18} {:-<16} {:->6} {:->12} {:->12} {:->12} {:->12}", "", "", "", "", "", "", "");
                for summary in summaries {
                    let measurement = if self.colored {
                        style(&summary.measurement).cyan().to_string()
                    } else {
                        summary.measurement.clone()
                    };
                    println!(
                        "{:<18} {:<16} {:>6} {:>12.2} {:>12.2} {:>12.2} {:>12.2}",
                        measurement, summary.field, summary.count, summary.min, summary.avg, summary.max, summary.latest
                    );
                }
            }
        }
        Ok(())
    }

    fn print_heading(&self, title: &str) {
        if self.colored {
            println!("{}", style(title).bold().underlined());
        } else {
            println!("{}", title);
        }
    }

    pub fn print_success(&self, message: &str) -> Result<()> {
        if self.colored {
            println!("{} {}", style("✓").green().bold(), message);
        } else {
            println!("✓ {}", message);
        }
        Ok(())
    }

    pub fn print_warning(&self, message: &str) -> Result<()> {
        if self.colored {
            println!("{} {}", style("⚠").yellow().bold(), message);
        } else {
            println!("⚠ {}", message);
        }
        Ok(())
    }

    pub fn print_error(&self, message: &str) -> Result<()> {
        if self.colored {
            eprintln!("{} {}", style("✗").red().bold(), message);
        } else {
            eprintln!("✗ {}", message);
        }
        Ok(())
    }

    /// Spinner for interactive table output; hidden for machine formats
    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        if self.format != OutputFormat::Table {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.green} {msg}")
        {
            pb.set_style(spinner_style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

fn write_csv<T: Serialize>(records: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn format_tags(row: &MetricRow) -> String {
    row.tags
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(";")
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let kept: String = value.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
