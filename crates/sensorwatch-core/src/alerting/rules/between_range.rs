//! Readings inside or outside a `[min, max]` band

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::MeasurementSource;
use crate::error::Result;
use crate::models::{Device, EvaluationWindow, IssueDetail, Measurement, SortOrder};

use super::{ConfigReader, NumericSample};

const EXAMPLE_LIMIT: usize = 10;

/// Which side of the band raises the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeSide {
    #[serde(rename = "fuera")]
    Outside,
    #[serde(rename = "dentro")]
    Inside,
}

impl RangeSide {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "fuera" => Some(Self::Outside),
            "dentro" => Some(Self::Inside),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BetweenRangeRule {
    pub parameter: String,
    pub min: f64,
    pub max: f64,
    pub inclusivo: bool,
    pub alertar_si: RangeSide,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetweenRangeIssue {
    pub range_violations: usize,
    pub total_measurements: usize,
    pub min: f64,
    pub max: f64,
    pub inclusivo: bool,
    pub alertar_si: RangeSide,
    pub violating_values: Vec<NumericSample>,
}

impl BetweenRangeRule {
    pub(super) fn parse(parameter: String, config: &ConfigReader<'_>) -> Result<Self> {
        let min = config.required_number("min")?;
        let max = config.required_number("max")?;
        if min >= max {
            return Err(config.error(format!("min ({min}) must be less than max ({max})")));
        }

        let alertar_si = match config.text("alertar_si")? {
            None => RangeSide::Outside,
            Some(raw) => RangeSide::parse(raw)
                .ok_or_else(|| config.error("alertar_si must be 'fuera' or 'dentro'"))?,
        };

        Ok(Self {
            parameter,
            min,
            max,
            inclusivo: config.boolean("inclusivo")?.unwrap_or(true),
            alertar_si,
        })
    }

    pub fn config_json(&self) -> Value {
        json!({
            "min": self.min,
            "max": self.max,
            "inclusivo": self.inclusivo,
            "alertar_si": self.alertar_si,
        })
    }

    /// Whether a reading meets the alerting condition
    pub fn matches(&self, value: f64) -> bool {
        match (self.inclusivo, self.alertar_si) {
            (true, RangeSide::Outside) => value < self.min || value > self.max,
            (true, RangeSide::Inside) => value >= self.min && value <= self.max,
            (false, RangeSide::Outside) => value <= self.min || value >= self.max,
            (false, RangeSide::Inside) => value > self.min && value < self.max,
        }
    }

    pub fn detect(&self, series: &[Measurement]) -> Option<BetweenRangeIssue> {
        let violations: Vec<NumericSample> = series
            .iter()
            .filter_map(|m| m.numeric().map(|value| (m, value)))
            .filter(|(_, value)| self.matches(*value))
            .map(|(m, value)| NumericSample::new(m, value))
            .collect();

        if violations.is_empty() {
            return None;
        }

        Some(BetweenRangeIssue {
            range_violations: violations.len(),
            total_measurements: series.iter().filter(|m| m.value.is_some()).count(),
            min: self.min,
            max: self.max,
            inclusivo: self.inclusivo,
            alertar_si: self.alertar_si,
            violating_values: violations.into_iter().take(EXAMPLE_LIMIT).collect(),
        })
    }

    pub async fn inspect(
        &self,
        source: &dyn MeasurementSource,
        device: &Device,
        window: &EvaluationWindow,
    ) -> Result<Option<IssueDetail>> {
        let series = source
            .series_for_parameter(device.id, &self.parameter, window, SortOrder::Descending)
            .await?;

        Ok(self.detect(&series).map(IssueDetail::RangeViolation))
    }

    pub fn title(&self, device: &Device) -> String {
        let side = match self.alertar_si {
            RangeSide::Outside => "outside",
            RangeSide::Inside => "inside",
        };
        format!(
            "Alert: {} {side} range [{}, {}] on device {}",
            self.parameter, self.min, self.max, device.code
        )
    }
}
