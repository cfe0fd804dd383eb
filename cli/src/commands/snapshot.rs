//! Summaries of snapshot files written by the agent's exporter

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::api::MetricRow;
use crate::error::{PulseError, Result};
use crate::output::OutputManager;

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Snapshot file (metrics_YYYYMMDD_HHMMSS.txt)
    pub file: PathBuf,

    /// Only summarize this measurement
    #[arg(long, short)]
    pub measurement: Option<String>,
}

/// Statistics of one (measurement, field) series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub measurement: String,
    pub field: String,
    pub count: usize,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub latest: f64,
}

struct Accumulator {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
    latest: (DateTime<Utc>, f64),
}

impl Accumulator {
    fn new(row: &MetricRow) -> Self {
        Self {
            count: 1,
            sum: row.value,
            min: row.value,
            max: row.value,
            latest: (row.time, row.value),
        }
    }

    fn add(&mut self, row: &MetricRow) {
        self.count += 1;
        self.sum += row.value;
        self.min = self.min.min(row.value);
        self.max = self.max.max(row.value);
        if row.time >= self.latest.0 {
            self.latest = (row.time, row.value);
        }
    }
}

pub async fn run(args: SnapshotArgs, output: OutputManager) -> Result<()> {
    let rows = load_snapshot(&args.file).await?;
    let summaries = summarize(&rows, args.measurement.as_deref());
    output.print_summaries(&summaries)
}

/// Read a snapshot file into rows
pub async fn load_snapshot(path: &Path) -> Result<Vec<MetricRow>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|_| PulseError::FileNotFound {
        path: path.display().to_string(),
    })?;

    serde_json::from_str(&content).map_err(|e| PulseError::InvalidSnapshot(format!("{}: {}", path.display(), e)))
}

/// Pivot rows into one summary per (measurement, field), sorted by both
pub fn summarize(rows: &[MetricRow], measurement: Option<&str>) -> Vec<FieldSummary> {
    let mut series: BTreeMap<(&str, &str), Accumulator> = BTreeMap::new();

    for row in rows {
        if measurement.is_some_and(|m| row.measurement != m) {
            continue;
        }
        series
            .entry((row.measurement.as_str(), row.field.as_str()))
            .and_modify(|acc| acc.add(row))
            .or_insert_with(|| Accumulator::new(row));
    }

    series
        .into_iter()
        .map(|((measurement, field), acc)| FieldSummary {
            measurement: measurement.to_string(),
            field: field.to_string(),
            count: acc.count,
            min: acc.min,
            avg: acc.sum / acc.count as f64,
            max: acc.max,
            latest: acc.latest.1,
        })
        .collect()
}
