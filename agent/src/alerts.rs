//! Threshold alerting
//!
//! Rules are static configuration; evaluation is a pure function of the
//! current rate sample. There is no hysteresis: every tick above threshold
//! raises again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalizer::RateSample;

/// Direction of a threshold comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    GreaterThan,
    LessThan,
}

impl Comparison {
    fn exceeds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::LessThan => "<",
        }
    }
}

/// A single threshold rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Metric name as exposed by `RateSample::alert_values`
    pub metric: String,

    /// Threshold value
    pub threshold: f64,

    /// Comparison applied as `value <op> threshold`
    #[serde(default)]
    pub comparison: Comparison,
}

impl AlertRule {
    pub fn above(metric: impl Into<String>, threshold: f64) -> Self {
        Self {
            metric: metric.into(),
            threshold,
            comparison: Comparison::GreaterThan,
        }
    }

    pub fn below(metric: impl Into<String>, threshold: f64) -> Self {
        Self {
            metric: metric.into(),
            threshold,
            comparison: Comparison::LessThan,
        }
    }
}

/// A raised alert, ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub comparison: Comparison,
    pub raised_at: DateTime<Utc>,
}

impl Notification {
    /// Human readable message sent to the notifier
    pub fn message(&self) -> String {
        format!(
            "ALERT: {} is {:.1} ({} threshold {:.1}) at {}",
            self.metric,
            self.value,
            self.comparison.symbol(),
            self.threshold,
            self.raised_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Evaluate every rule against the sample.
///
/// Rules naming an unknown metric never fire.
pub fn evaluate(sample: &RateSample, rules: &[AlertRule], raised_at: DateTime<Utc>) -> Vec<Notification> {
    let values = sample.alert_values();

    rules
        .iter()
        .filter_map(|rule| {
            let value = values.iter().find(|v| v.name == rule.metric)?.value;
            rule.comparison.exceeds(value, rule.threshold).then(|| Notification {
                metric: rule.metric.clone(),
                value,
                threshold: rule.threshold,
                comparison: rule.comparison,
                raised_at,
            })
        })
        .collect()
}
