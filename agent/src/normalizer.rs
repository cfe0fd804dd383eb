//! Rate normalization
//!
//! Turns two consecutive counter snapshots into per-second rates. The
//! normalizer is a pure function of its inputs; the sampler owns the
//! "previous" snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::CounterSnapshot;

const MIB: f64 = 1024.0 * 1024.0;

/// What to do with a counter that went backwards between snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Report the negative rate unchanged
    #[default]
    PassThrough,

    /// Report zero for that tick
    ClampToZero,
}

/// Disk rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiskRates {
    pub read_mb_s: f64,
    pub write_mb_s: f64,
    pub read_iops: f64,
    pub write_iops: f64,
}

/// Network rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkRates {
    pub sent_mb_s: f64,
    pub recv_mb_s: f64,
    pub packets_sent_s: f64,
    pub packets_recv_s: f64,
    pub errors_in_s: f64,
    pub errors_out_s: f64,
}

/// Derived rates for one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSample {
    /// Seconds actually divided by, after the floor was applied
    pub elapsed_secs: f64,

    /// Disk rates
    pub disk: DiskRates,

    /// Network rates
    pub network: NetworkRates,

    /// CPU percentage from the current snapshot
    pub cpu_pct: f64,

    /// Memory percentage from the current snapshot
    pub mem_pct: f64,

    /// Counters that went backwards since the previous snapshot
    pub counter_resets: Vec<&'static str>,
}

/// A named scalar from a rate sample, as seen by alert rules
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub name: &'static str,
    pub value: f64,
}

impl RateSample {
    /// Values alert rules can refer to by name
    pub fn alert_values(&self) -> Vec<MetricValue> {
        vec![
            MetricValue { name: "cpu_usage", value: self.cpu_pct },
            MetricValue { name: "memory_usage", value: self.mem_pct },
            MetricValue { name: "disk_read_mb_s", value: self.disk.read_mb_s },
            MetricValue { name: "disk_write_mb_s", value: self.disk.write_mb_s },
            MetricValue { name: "net_sent_mb_s", value: self.network.sent_mb_s },
            MetricValue { name: "net_recv_mb_s", value: self.network.recv_mb_s },
        ]
    }
}

/// Computes per-second rates between snapshots
#[derive(Debug, Clone, Copy)]
pub struct RateNormalizer {
    floor: Duration,
    reset_policy: ResetPolicy,
}

impl Default for RateNormalizer {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            reset_policy: ResetPolicy::PassThrough,
        }
    }
}

impl RateNormalizer {
    /// Create a normalizer with the given elapsed-time floor and reset policy
    pub fn new(floor: Duration, reset_policy: ResetPolicy) -> Self {
        // A zero floor would reintroduce division by zero
        let floor = if floor.is_zero() { Duration::from_secs(1) } else { floor };
        Self { floor, reset_policy }
    }

    /// Elapsed-time floor
    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// Compute rates from `prev` (taken at `prev_time`) to `cur` (taken at `cur_time`)
    pub fn normalize(
        &self,
        prev: &CounterSnapshot,
        prev_time: DateTime<Utc>,
        cur: &CounterSnapshot,
        cur_time: DateTime<Utc>,
    ) -> RateSample {
        let elapsed = (cur_time - prev_time)
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(self.floor)
            .as_secs_f64();

        let mut resets = Vec::new();
        let mut rate = |name: &'static str, prev: u64, cur: u64| -> f64 {
            if cur < prev {
                resets.push(name);
                if self.reset_policy == ResetPolicy::ClampToZero {
                    return 0.0;
                }
            }
            (cur as f64 - prev as f64) / elapsed
        };

        let disk = DiskRates {
            read_mb_s: rate("disk.read_bytes", prev.disk.read_bytes, cur.disk.read_bytes) / MIB,
            write_mb_s: rate("disk.write_bytes", prev.disk.write_bytes, cur.disk.write_bytes) / MIB,
            read_iops: rate("disk.read_ops", prev.disk.read_ops, cur.disk.read_ops),
            write_iops: rate("disk.write_ops", prev.disk.write_ops, cur.disk.write_ops),
        };

        let network = NetworkRates {
            sent_mb_s: rate("net.bytes_sent", prev.network.bytes_sent, cur.network.bytes_sent) / MIB,
            recv_mb_s: rate("net.bytes_recv", prev.network.bytes_recv, cur.network.bytes_recv) / MIB,
            packets_sent_s: rate("net.packets_sent", prev.network.packets_sent, cur.network.packets_sent),
            packets_recv_s: rate("net.packets_recv", prev.network.packets_recv, cur.network.packets_recv),
            errors_in_s: rate("net.errors_in", prev.network.errors_in, cur.network.errors_in),
            errors_out_s: rate("net.errors_out", prev.network.errors_out, cur.network.errors_out),
        };

        RateSample {
            elapsed_secs: elapsed,
            disk,
            network,
            cpu_pct: cur.cpu_pct,
            mem_pct: cur.memory.used_pct,
            counter_resets: resets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot_with_reads(read_ops: u64, read_bytes: u64) -> CounterSnapshot {
        let mut s = CounterSnapshot::empty(t(0));
        s.disk.read_ops = read_ops;
        s.disk.read_bytes = read_bytes;
        s
    }

    #[test]
    fn test_rate_is_delta_over_elapsed() {
        let prev = snapshot_with_reads(100, 0);
        let cur = snapshot_with_reads(600, 10 * 1024 * 1024);

        let sample = RateNormalizer::default().normalize(&prev, t(0), &cur, t(5));
        assert_eq!(sample.elapsed_secs, 5.0);
        assert_eq!(sample.disk.read_iops, 100.0);
        assert_eq!(sample.disk.read_mb_s, 2.0);
        assert!(sample.counter_resets.is_empty());
    }

    #[test]
    fn test_non_positive_elapsed_uses_floor() {
        let prev = snapshot_with_reads(0, 0);
        let cur = snapshot_with_reads(10, 0);
        let normalizer = RateNormalizer::default();

        let same = normalizer.normalize(&prev, t(5), &cur, t(5));
        assert_eq!(same.elapsed_secs, 1.0);
        assert_eq!(same.disk.read_iops, 10.0);

        let backwards = normalizer.normalize(&prev, t(10), &cur, t(5));
        assert_eq!(backwards.elapsed_secs, 1.0);
        assert!(backwards.disk.read_iops.is_finite());
    }

    #[test]
    fn test_counter_reset_passes_negative_rate_through() {
        let prev = snapshot_with_reads(500, 0);
        let cur = snapshot_with_reads(100, 0);

        let sample = RateNormalizer::default().normalize(&prev, t(0), &cur, t(4));
        assert_eq!(sample.disk.read_iops, -100.0);
        assert_eq!(sample.counter_resets, vec!["disk.read_ops"]);
    }

    #[test]
    fn test_counter_reset_clamped_when_configured() {
        let prev = snapshot_with_reads(500, 0);
        let cur = snapshot_with_reads(100, 0);

        let normalizer = RateNormalizer::new(Duration::from_secs(1), ResetPolicy::ClampToZero);
        let sample = normalizer.normalize(&prev, t(0), &cur, t(4));
        assert_eq!(sample.disk.read_iops, 0.0);
        assert_eq!(sample.counter_resets, vec!["disk.read_ops"]);
    }

    #[test]
    fn test_percentages_pass_through() {
        let prev = CounterSnapshot::empty(t(0));
        let mut cur = CounterSnapshot::empty(t(5));
        cur.cpu_pct = 42.5;
        cur.memory.used_pct = 61.0;

        let sample = RateNormalizer::default().normalize(&prev, t(0), &cur, t(5));
        assert_eq!(sample.cpu_pct, 42.5);
        assert_eq!(sample.mem_pct, 61.0);

        let values = sample.alert_values();
        assert!(values.contains(&MetricValue { name: "cpu_usage", value: 42.5 }));
        assert!(values.contains(&MetricValue { name: "memory_usage", value: 61.0 }));
    }

    #[test]
    fn test_zero_floor_is_replaced() {
        let normalizer = RateNormalizer::new(Duration::ZERO, ResetPolicy::PassThrough);
        assert_eq!(normalizer.floor(), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn prop_monotonic_counters_give_exact_rate(
            prev in 0u64..1_000_000_000,
            delta in 0u64..1_000_000_000,
            elapsed in 1i64..3_600,
        ) {
            let prev_snap = snapshot_with_reads(prev, 0);
            let cur_snap = snapshot_with_reads(prev + delta, 0);

            let sample = RateNormalizer::default().normalize(&prev_snap, t(0), &cur_snap, t(elapsed));
            prop_assert_eq!(sample.disk.read_iops, ((prev + delta) as f64 - prev as f64) / elapsed as f64);
            prop_assert!(sample.counter_resets.is_empty());
        }

        #[test]
        fn prop_non_positive_elapsed_is_finite(
            prev in 0u64..u32::MAX as u64,
            cur in 0u64..u32::MAX as u64,
            back in 0i64..10_000,
        ) {
            let prev_snap = snapshot_with_reads(prev, prev);
            let cur_snap = snapshot_with_reads(cur, cur);

            let sample = RateNormalizer::default().normalize(&prev_snap, t(back), &cur_snap, t(0));
            prop_assert_eq!(sample.elapsed_secs, 1.0);
            prop_assert!(sample.disk.read_iops.is_finite());
            prop_assert!(sample.disk.read_mb_s.is_finite());
        }
    }
}
