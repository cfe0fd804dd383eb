//! Host counter collection backed by `sysinfo`
//!
//! `SysinfoSource` keeps one `System` and one `Networks` instance alive across
//! captures: sysinfo computes CPU usage between consecutive refreshes, so the
//! handles must persist. All reads happen on the blocking pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Networks, Pid, System};

use crate::error::{CollectorError, CollectorResult};
use crate::snapshot::{
    CounterSnapshot, CounterSource, CpuIdentity, DiskCounters, LoadAverage, MemoryUsage,
    NetworkCounters, ProcessProbe, ProcessSample,
};

/// Sector size used by `/proc/diskstats`
const SECTOR_BYTES: u64 = 512;

struct SysinfoState {
    system: System,
    networks: Networks,
}

/// Counter source reading the local host
pub struct SysinfoSource {
    state: Arc<Mutex<SysinfoState>>,
}

impl SysinfoSource {
    /// Create a source with primed CPU and process state
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_cpu();
        let networks = Networks::new_with_refreshed_list();

        Self {
            state: Arc::new(Mutex::new(SysinfoState { system, networks })),
        }
    }

    /// Host name as reported by the OS
    pub fn hostname() -> String {
        System::host_name().unwrap_or_else(|| "unknown".to_string())
    }

    fn capture_blocking(state: &mut SysinfoState) -> CounterSnapshot {
        let taken_at = Utc::now();
        let system = &mut state.system;

        system.refresh_cpu();
        system.refresh_memory();

        // Pids known before the refresh and missing after it exited since the last capture
        let listed: Vec<Pid> = system.processes().keys().copied().collect();
        system.refresh_processes();

        let total_memory = system.total_memory();
        let used_memory = system.used_memory();
        let memory = MemoryUsage {
            total_bytes: total_memory,
            used_bytes: used_memory,
            used_pct: percent(used_memory, total_memory),
        };

        let mut processes: Vec<ProcessProbe> = system
            .processes()
            .iter()
            .map(|(pid, process)| {
                ProcessProbe::Alive(ProcessSample {
                    pid: pid.as_u32(),
                    name: process.name().to_string(),
                    cpu_pct: f64::from(process.cpu_usage()),
                    mem_pct: percent(process.memory(), total_memory),
                })
            })
            .collect();
        processes.extend(
            listed
                .into_iter()
                .filter(|pid| system.process(*pid).is_none())
                .map(|pid| ProcessProbe::Vanished { pid: pid.as_u32() }),
        );

        state.networks.refresh();
        let mut network = NetworkCounters::default();
        for (_name, data) in state.networks.iter() {
            network.bytes_sent += data.total_transmitted();
            network.bytes_recv += data.total_received();
            network.packets_sent += data.total_packets_transmitted();
            network.packets_recv += data.total_packets_received();
            network.errors_in += data.total_errors_on_received();
            network.errors_out += data.total_errors_on_transmitted();
        }

        let disk = read_disk_counters(&state.system);
        let load = read_load_average();

        CounterSnapshot {
            taken_at,
            disk,
            network,
            cpu_pct: f64::from(state.system.global_cpu_info().cpu_usage()),
            memory,
            load,
            uptime_secs: System::uptime(),
            processes,
        }
    }

    fn identity_blocking(state: &mut SysinfoState) -> CpuIdentity {
        let system = &mut state.system;
        system.refresh_cpu();

        let cpus = system.cpus();
        CpuIdentity {
            brand: cpus.first().map(|cpu| cpu.brand().trim().to_string()).unwrap_or_default(),
            physical_cores: system.physical_core_count().unwrap_or(0),
            logical_cores: cpus.len(),
            frequency_mhz: cpus.iter().map(|cpu| cpu.frequency()).max().unwrap_or(0),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterSource for SysinfoSource {
    async fn capture(&mut self) -> CollectorResult<CounterSnapshot> {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().map_err(|_| CollectorError::CaptureFailed {
                reason: "sysinfo state lock poisoned".to_string(),
            })?;
            Ok(Self::capture_blocking(&mut guard))
        })
        .await
        .map_err(|e| CollectorError::CaptureFailed { reason: e.to_string() })?
    }

    async fn cpu_identity(&mut self) -> CollectorResult<CpuIdentity> {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().map_err(|_| CollectorError::CaptureFailed {
                reason: "sysinfo state lock poisoned".to_string(),
            })?;
            Ok(Self::identity_blocking(&mut guard))
        })
        .await
        .map_err(|e| CollectorError::CaptureFailed { reason: e.to_string() })?
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn read_load_average() -> Option<LoadAverage> {
    if cfg!(target_os = "windows") {
        return None;
    }
    let load = System::load_average();
    Some(LoadAverage {
        one: load.one,
        five: load.five,
        fifteen: load.fifteen,
    })
}

#[cfg(target_os = "linux")]
fn read_disk_counters(_system: &System) -> DiskCounters {
    match std::fs::read_to_string("/proc/diskstats") {
        Ok(content) => parse_diskstats(&content, |name| {
            std::path::Path::new("/sys/block").join(name).exists()
        }),
        Err(e) => {
            tracing::debug!("Unable to read /proc/diskstats: {}", e);
            DiskCounters::default()
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn read_disk_counters(system: &System) -> DiskCounters {
    // No system-wide counters here; approximate with per-process totals
    let mut disk = DiskCounters::default();
    for process in system.processes().values() {
        let usage = process.disk_usage();
        disk.read_bytes += usage.total_read_bytes;
        disk.write_bytes += usage.total_written_bytes;
    }
    disk
}

/// Sum `/proc/diskstats` over whole disks.
///
/// `is_whole_disk` filters out partitions so bytes are not counted twice;
/// loop and ram devices are always skipped.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_diskstats(content: &str, is_whole_disk: impl Fn(&str) -> bool) -> DiskCounters {
    let mut disk = DiskCounters::default();

    for line in content.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 10 {
            continue;
        }
        let name = cols[2];
        if name.starts_with("loop") || name.starts_with("ram") || !is_whole_disk(name) {
            continue;
        }

        let num = |i: usize| cols[i].parse::<u64>().unwrap_or(0);
        disk.read_ops += num(3);
        disk.read_bytes += num(5) * SECTOR_BYTES;
        disk.write_ops += num(7);
        disk.write_bytes += num(9) * SECTOR_BYTES;
    }

    disk
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS: &str = "\
   7       0 loop0 120 0 2400 10 0 0 0 0 0 20 10 0 0 0 0 0 0
   8       0 sda 1000 10 8000 500 200 5 4000 300 0 700 800 0 0 0 0 0 0
   8       1 sda1 900 10 7000 450 190 5 3800 280 0 650 730 0 0 0 0 0 0
 259       0 nvme0n1 50 0 100 5 25 0 200 3 0 8 8 0 0 0 0 0 0
";

    #[test]
    fn test_parse_diskstats_whole_disks_only() {
        let disk = parse_diskstats(DISKSTATS, |name| name == "sda" || name == "nvme0n1");

        assert_eq!(disk.read_ops, 1050);
        assert_eq!(disk.write_ops, 225);
        assert_eq!(disk.read_bytes, (8000 + 100) * SECTOR_BYTES);
        assert_eq!(disk.write_bytes, (4000 + 200) * SECTOR_BYTES);
    }

    #[test]
    fn test_parse_diskstats_ignores_short_lines() {
        let disk = parse_diskstats("garbage\n8 0 sda 1\n", |_| true);
        assert_eq!(disk, DiskCounters::default());
    }

    #[test]
    fn test_percent_handles_zero_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }

    #[tokio::test]
    async fn test_capture_reads_host() {
        let mut source = SysinfoSource::new();
        let snapshot = source.capture().await.unwrap();

        assert!(snapshot.memory.total_bytes > 0);
        assert!(snapshot.memory.used_pct >= 0.0 && snapshot.memory.used_pct <= 100.0);

        let identity = source.cpu_identity().await.unwrap();
        assert!(identity.logical_cores > 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_capture_includes_processes_started_since_last_capture() {
        let mut source = SysinfoSource::new();
        source.capture().await.unwrap();

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let child_pid = child.id();

        let snapshot = source.capture().await.unwrap();
        let _ = child.kill();
        let _ = child.wait();

        let seen = snapshot
            .processes
            .iter()
            .any(|probe| matches!(probe, ProcessProbe::Alive(sample) if sample.pid == child_pid));
        assert!(seen, "child {} missing from capture", child_pid);
        assert!(!snapshot
            .processes
            .iter()
            .any(|probe| matches!(probe, ProcessProbe::Vanished { pid } if *pid == child_pid)));
    }
}
