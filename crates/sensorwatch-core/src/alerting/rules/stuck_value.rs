//! Frozen signals: too few distinct values across a sliding window

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::MeasurementSource;
use crate::error::Result;
use crate::models::{parse_numeric, Device, EvaluationWindow, IssueDetail, Measurement, SortOrder};

use super::ConfigReader;

const PERIOD_LIMIT: usize = 5;

/// Label of a stuck window holding more than one distinct value
pub const MULTIPLE_VALUES: &str = "múltiples";

#[derive(Debug, Clone, PartialEq)]
pub struct StuckValueRule {
    pub parameter: String,
    pub ventana_muestras: usize,
    pub max_unicos: usize,
}

/// Consolidated run of stuck windows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckPeriod {
    pub inicio: DateTime<Utc>,
    pub fin: DateTime<Utc>,
    pub valor_congelado: String,
    pub muestras: usize,
    pub valores_unicos: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckValueIssue {
    pub stuck_periods: usize,
    pub total_measurements: usize,
    pub ventana_muestras: usize,
    pub max_unicos: usize,
    pub periods: Vec<StuckPeriod>,
}

/// Distinctness key: numbers compare as floats, anything else as lowercase text
#[derive(Debug, PartialEq, Eq, Hash)]
enum ValueKey {
    Number(u64),
    Text(String),
}

impl ValueKey {
    fn of(raw: &str) -> Self {
        match parse_numeric(raw) {
            // +0.0 and -0.0 share a key
            Some(n) => Self::Number((n + 0.0).to_bits()),
            None => Self::Text(raw.trim().to_lowercase()),
        }
    }
}

/// Period under construction, tracked by series indices
struct OpenPeriod {
    first: usize,
    last: usize,
    label: String,
    unique: usize,
}

impl StuckValueRule {
    pub(super) fn parse(parameter: String, config: &ConfigReader<'_>) -> Result<Self> {
        let window = config.integer("ventana_muestras")?.unwrap_or(10);
        if window < 2 {
            return Err(config.error("ventana_muestras must be at least 2"));
        }

        let max_unique = config.integer("max_unicos")?.unwrap_or(1);
        if max_unique < 1 {
            return Err(config.error("max_unicos must be at least 1"));
        }

        Ok(Self {
            parameter,
            ventana_muestras: window as usize,
            max_unicos: max_unique as usize,
        })
    }

    pub fn config_json(&self) -> Value {
        json!({
            "ventana_muestras": self.ventana_muestras,
            "max_unicos": self.max_unicos,
        })
    }

    /// `series` is oldest first; blank and null readings are ignored
    pub fn detect(&self, series: &[Measurement]) -> Option<StuckValueIssue> {
        let rows: Vec<(&Measurement, &str)> = series
            .iter()
            .filter_map(|m| m.value.as_deref().map(|v| (m, v.trim())))
            .filter(|(_, v)| !v.is_empty())
            .collect();

        let w = self.ventana_muestras;
        if rows.len() < w {
            return None;
        }

        let mut periods: Vec<OpenPeriod> = Vec::new();

        for (start, window) in rows.windows(w).enumerate() {
            let keys: HashSet<ValueKey> = window.iter().map(|(_, v)| ValueKey::of(v)).collect();
            if keys.len() > self.max_unicos {
                continue;
            }

            let label = if keys.len() == 1 {
                window[0].1.to_string()
            } else {
                MULTIPLE_VALUES.to_string()
            };
            let end = start + w - 1;

            match periods.last_mut() {
                Some(open)
                    if open.label == label
                        && rows[start].0.timestamp - rows[open.last].0.timestamp
                            < Duration::hours(1) =>
                {
                    open.last = end;
                    open.unique = open.unique.max(keys.len());
                }
                _ => periods.push(OpenPeriod {
                    first: start,
                    last: end,
                    label,
                    unique: keys.len(),
                }),
            }
        }

        if periods.is_empty() {
            return None;
        }

        Some(StuckValueIssue {
            stuck_periods: periods.len(),
            total_measurements: rows.len(),
            ventana_muestras: w,
            max_unicos: self.max_unicos,
            periods: periods
                .into_iter()
                .take(PERIOD_LIMIT)
                .map(|p| StuckPeriod {
                    inicio: rows[p.first].0.timestamp,
                    fin: rows[p.last].0.timestamp,
                    valor_congelado: p.label,
                    muestras: p.last - p.first + 1,
                    valores_unicos: p.unique,
                })
                .collect(),
        })
    }

    pub async fn inspect(
        &self,
        source: &dyn MeasurementSource,
        device: &Device,
        window: &EvaluationWindow,
    ) -> Result<Option<IssueDetail>> {
        let series = source
            .series_for_parameter(device.id, &self.parameter, window, SortOrder::Ascending)
            .await?;

        Ok(self.detect(&series).map(IssueDetail::StuckValue))
    }

    pub fn title(&self, device: &Device) -> String {
        format!(
            "Alert: {} stuck on device {} ({} samples, at most {} distinct)",
            self.parameter, device.code, self.ventana_muestras, self.max_unicos
        )
    }
}
