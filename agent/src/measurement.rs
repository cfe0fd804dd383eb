//! Measurement data model
//!
//! A `Measurement` is one entity-instant of a named stream: identity tags,
//! co-located numeric fields and the sampling timestamp. The sink stores it
//! field by field, so reads come back as `FlatRow`s.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static CPU identity, written once at startup
pub const CPU_INFO: &str = "cpu_info";
/// Global CPU utilisation
pub const CPU_USAGE: &str = "cpu_usage";
/// Memory totals and utilisation
pub const MEMORY_USAGE: &str = "memory_usage";
/// Disk throughput and operation rates
pub const DISK_IO: &str = "disk_io";
/// Network throughput, packet and error rates
pub const NETWORK_ACTIVITY: &str = "network_activity";
/// One row per running process
pub const PROCESS_INFO: &str = "process_info";
/// Load averages
pub const SYSTEM_LOAD: &str = "system_load";
/// Seconds since boot
pub const SYSTEM_UPTIME: &str = "system_uptime";

/// Tag carried by every measurement
pub const TAG_HOSTNAME: &str = "hostname";
/// Process identifier tag on `process_info`
pub const TAG_PID: &str = "pid";
/// Process name tag on `process_info`
pub const TAG_NAME: &str = "name";

/// A tagged, timestamped set of fields for one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Stream name
    pub stream: String,

    /// Identity-defining tags
    pub tags: BTreeMap<String, String>,

    /// Numeric facts about the entity at this instant
    pub fields: BTreeMap<String, f64>,

    /// Sampling instant
    pub timestamp: DateTime<Utc>,
}

/// One field of one measurement, as returned by a sink range query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    /// Sampling instant
    pub time: DateTime<Utc>,

    /// Stream name
    pub measurement: String,

    /// Field name
    pub field: String,

    /// Field value
    pub value: f64,

    /// Tags, flattened into the serialized object
    #[serde(flatten)]
    pub tags: BTreeMap<String, String>,
}

impl Measurement {
    /// Start a measurement for `stream` at `timestamp`
    pub fn new(stream: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            stream: stream.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field
    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Split into one row per field
    pub fn flatten(&self) -> Vec<FlatRow> {
        self.fields
            .iter()
            .map(|(field, value)| FlatRow {
                time: self.timestamp,
                measurement: self.stream.clone(),
                field: field.clone(),
                value: *value,
                tags: self.tags.clone(),
            })
            .collect()
    }

    /// Render as InfluxDB line protocol with a nanosecond timestamp.
    ///
    /// Non-finite fields and empty tag values are dropped; returns `None` when
    /// no field survives since the store rejects field-less lines.
    pub fn to_line_protocol(&self) -> Option<String> {
        let fields: Vec<(&String, &f64)> = self.fields.iter().filter(|(_, v)| v.is_finite()).collect();
        if fields.is_empty() {
            return None;
        }

        let mut line = escape(&self.stream, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            let _ = write!(line, ",{}={}", escape(key, &[',', '=', ' ']), escape(value, &[',', '=', ' ']));
        }

        line.push(' ');
        for (i, (key, value)) in fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            let _ = write!(line, "{}={}", escape(key, &[',', '=', ' ']), value);
        }

        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_millis() * 1_000_000);
        let _ = write!(line, " {}", nanos);
        Some(line)
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl FlatRow {
    /// Tag value by key
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}
