//! Per-process view over flattened rows
//!
//! The sink returns one row per field, so a process's CPU and memory figures
//! arrive as separate rows. `aggregate` folds them back into one record per
//! pid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::measurement::{FlatRow, PROCESS_INFO, TAG_NAME, TAG_PID};

/// One process, reassembled from its field rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub cpu_pct: f64,
    pub mem_pct: f64,
}

impl ProcessRecord {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            name: String::new(),
            cpu_pct: 0.0,
            mem_pct: 0.0,
        }
    }
}

/// Fold `process_info` rows into one record per pid, sorted by pid.
///
/// Rows from other streams, and rows without a numeric `pid` tag, are
/// ignored. When several rows carry the same field the last one wins.
pub fn aggregate(rows: &[FlatRow]) -> Vec<ProcessRecord> {
    let mut by_pid: BTreeMap<u32, ProcessRecord> = BTreeMap::new();

    for row in rows.iter().filter(|r| r.measurement == PROCESS_INFO) {
        let Some(pid) = row.tag(TAG_PID).and_then(|p| p.trim().parse::<u32>().ok()) else {
            continue;
        };

        let record = by_pid.entry(pid).or_insert_with(|| ProcessRecord::new(pid));
        if record.name.is_empty() {
            if let Some(name) = row.tag(TAG_NAME) {
                record.name = name.to_string();
            }
        }

        match row.field.as_str() {
            "cpu_pct" => record.cpu_pct = row.value,
            "mem_pct" => record.mem_pct = row.value,
            _ => {}
        }
    }

    by_pid.into_values().collect()
}

/// The `limit` records with the highest CPU usage, highest first
pub fn top_by_cpu(mut records: Vec<ProcessRecord>, limit: usize) -> Vec<ProcessRecord> {
    records.sort_by(|a, b| b.cpu_pct.total_cmp(&a.cpu_pct).then(a.pid.cmp(&b.pid)));
    records.truncate(limit);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(measurement: &str, pid: Option<&str>, name: &str, field: &str, value: f64) -> FlatRow {
        let mut tags = BTreeMap::new();
        if let Some(pid) = pid {
            tags.insert(TAG_PID.to_string(), pid.to_string());
        }
        tags.insert(TAG_NAME.to_string(), name.to_string());
        FlatRow {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            measurement: measurement.to_string(),
            field: field.to_string(),
            value,
            tags,
        }
    }

    #[test]
    fn test_rows_fold_into_records() {
        let rows = vec![
            row(PROCESS_INFO, Some("7"), "a", "cpu_pct", 3.0),
            row(PROCESS_INFO, Some("7"), "a", "mem_pct", 1.5),
            row(PROCESS_INFO, Some("9"), "b", "cpu_pct", 0.0),
        ];

        let records = aggregate(&rows);
        assert_eq!(
            records,
            vec![
                ProcessRecord { pid: 7, name: "a".to_string(), cpu_pct: 3.0, mem_pct: 1.5 },
                ProcessRecord { pid: 9, name: "b".to_string(), cpu_pct: 0.0, mem_pct: 0.0 },
            ]
        );
    }

    #[test]
    fn test_unparseable_pid_and_other_streams_ignored() {
        let rows = vec![
            row(PROCESS_INFO, Some("abc"), "x", "cpu_pct", 50.0),
            row(PROCESS_INFO, None, "y", "cpu_pct", 50.0),
            row("cpu_usage", Some("1"), "z", "cpu_pct", 50.0),
            row(PROCESS_INFO, Some("3"), "w", "threads", 8.0),
        ];

        let records = aggregate(&rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], ProcessRecord { pid: 3, name: "w".to_string(), cpu_pct: 0.0, mem_pct: 0.0 });
    }

    #[test]
    fn test_later_rows_win() {
        let rows = vec![
            row(PROCESS_INFO, Some("7"), "a", "cpu_pct", 3.0),
            row(PROCESS_INFO, Some("7"), "a", "cpu_pct", 9.0),
        ];
        assert_eq!(aggregate(&rows)[0].cpu_pct, 9.0);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let rows = vec![
            row(PROCESS_INFO, Some("20"), "b", "cpu_pct", 1.0),
            row(PROCESS_INFO, Some("4"), "a", "mem_pct", 2.0),
        ];
        let first = aggregate(&rows);
        assert_eq!(first, aggregate(&rows));
        assert_eq!(first.iter().map(|r| r.pid).collect::<Vec<_>>(), vec![4, 20]);
    }

    #[test]
    fn test_top_by_cpu() {
        let records = vec![
            ProcessRecord { pid: 1, name: "a".to_string(), cpu_pct: 5.0, mem_pct: 0.0 },
            ProcessRecord { pid: 2, name: "b".to_string(), cpu_pct: 50.0, mem_pct: 0.0 },
            ProcessRecord { pid: 3, name: "c".to_string(), cpu_pct: 20.0, mem_pct: 0.0 },
        ];

        let top = top_by_cpu(records, 2);
        assert_eq!(top.iter().map(|r| r.pid).collect::<Vec<_>>(), vec![2, 3]);
    }
}
