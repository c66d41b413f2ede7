//! Measurement data as seen by the alert engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which devices of a project a query covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Every device of the project
    All,
    /// Only the devices with these codes
    Codes(Vec<String>),
}

/// Closed time range `[start, end]` examined by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EvaluationWindow {
    /// The window of `length` ending at `end`
    pub fn trailing(end: DateTime<Utc>, length: chrono::Duration) -> Self {
        Self {
            start: end - length,
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// A physical device registered under a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Internal numeric id
    pub id: i64,
    /// Human-readable device code
    pub code: String,
}

impl Device {
    pub fn new(id: i64, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
        }
    }
}

/// Row ordering requested from the measurement store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A single timestamped reading; the raw value is not guaranteed numeric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub value: Option<String>,
}

impl Measurement {
    pub fn new(id: i64, timestamp: DateTime<Utc>, value: Option<&str>) -> Self {
        Self {
            id,
            timestamp,
            value: value.map(String::from),
        }
    }

    /// The value parsed as a finite float
    pub fn numeric(&self) -> Option<f64> {
        self.value.as_deref().and_then(parse_numeric)
    }

    /// Null, blank, or numerically zero
    pub fn is_missing(&self) -> bool {
        match self.value.as_deref() {
            None => true,
            Some(raw) if raw.trim().is_empty() => true,
            Some(raw) => parse_numeric(raw) == Some(0.0),
        }
    }
}

/// Readings of two parameters sharing an exact timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedMeasurement {
    pub timestamp: DateTime<Utc>,
    pub left_value: Option<String>,
    pub right_value: Option<String>,
    pub left_id: i64,
    pub right_id: i64,
}

impl PairedMeasurement {
    /// Both sides as floats, if both parse
    pub fn numeric_pair(&self) -> Option<(f64, f64)> {
        let left = self.left_value.as_deref().and_then(parse_numeric)?;
        let right = self.right_value.as_deref().and_then(parse_numeric)?;
        Some((left, right))
    }
}

/// Parse a raw stored value, rejecting NaN and infinities
pub fn parse_numeric(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Compact reading reported inside issues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub id_dato: i64,
    pub fecha: DateTime<Utc>,
    pub valor: Option<String>,
}

impl From<&Measurement> for MeasurementSample {
    fn from(m: &Measurement) -> Self {
        Self {
            id_dato: m.id,
            fecha: m.timestamp,
            valor: m.value.clone(),
        }
    }
}
