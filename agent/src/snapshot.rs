//! Counter snapshots and the source that produces them
//!
//! A `CounterSnapshot` is an immutable, point-in-time view of cumulative OS
//! counters. Two consecutive snapshots are the only input to rate
//! computation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollectorResult;

/// Cumulative disk counters since boot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_ops: u64,
    pub write_ops: u64,
}

/// Cumulative network counters since boot, summed over interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errors_in: u64,
    pub errors_out: u64,
}

/// Memory totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub used_pct: f64,
}

/// 1, 5 and 15 minute load averages
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// One process as seen at capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_pct: f64,
    pub mem_pct: f64,
}

/// Result of reading one listed process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessProbe {
    /// The process was readable
    Alive(ProcessSample),

    /// The process exited between listing and reading
    Vanished { pid: u32 },
}

/// Static CPU identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuIdentity {
    /// Vendor brand string
    pub brand: String,

    /// Physical core count, zero when unknown
    pub physical_cores: usize,

    /// Logical core count
    pub logical_cores: usize,

    /// Nominal frequency in MHz
    pub frequency_mhz: u64,
}

/// Point-in-time cumulative counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Wall-clock capture instant
    pub taken_at: DateTime<Utc>,

    /// Disk counters
    pub disk: DiskCounters,

    /// Network counters
    pub network: NetworkCounters,

    /// Global CPU utilisation percentage
    pub cpu_pct: f64,

    /// Memory totals
    pub memory: MemoryUsage,

    /// Load averages, `None` where the platform has none
    pub load: Option<LoadAverage>,

    /// Seconds since boot
    pub uptime_secs: u64,

    /// Per-process readings
    pub processes: Vec<ProcessProbe>,
}

impl CounterSnapshot {
    /// An all-zero snapshot taken at `taken_at`
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            disk: DiskCounters::default(),
            network: NetworkCounters::default(),
            cpu_pct: 0.0,
            memory: MemoryUsage::default(),
            load: None,
            uptime_secs: 0,
            processes: Vec::new(),
        }
    }

    /// Processes that were readable at capture time
    pub fn live_processes(&self) -> impl Iterator<Item = &ProcessSample> {
        self.processes.iter().filter_map(|probe| match probe {
            ProcessProbe::Alive(sample) => Some(sample),
            ProcessProbe::Vanished { .. } => None,
        })
    }

    /// Number of processes that vanished mid-scan
    pub fn vanished_count(&self) -> usize {
        self.processes
            .iter()
            .filter(|probe| matches!(probe, ProcessProbe::Vanished { .. }))
            .count()
    }
}

/// Source of counter snapshots
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Capture the current cumulative counters
    async fn capture(&mut self) -> CollectorResult<CounterSnapshot>;

    /// Read the static CPU identity
    async fn cpu_identity(&mut self) -> CollectorResult<CpuIdentity>;
}
