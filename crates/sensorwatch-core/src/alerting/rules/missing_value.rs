//! Null, blank or zero readings, and devices with no readings at all

use serde::Serialize;

use crate::db::MeasurementSource;
use crate::error::Result;
use crate::models::{
    Device, EvaluationWindow, IssueDetail, Measurement, MeasurementSample, SortOrder,
};

/// Example rows reported per device
const EXAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct MissingValueRule {
    pub parameter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingValueIssue {
    pub null_count: usize,
    pub total_measurements: i64,
    pub null_values: Vec<MeasurementSample>,
}

impl MissingValueRule {
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
        }
    }

    /// `series` is newest first; `total` counts every row in the window
    pub fn detect(&self, series: &[Measurement], total: i64) -> Option<IssueDetail> {
        let missing: Vec<&Measurement> = series.iter().filter(|m| m.is_missing()).collect();

        if total > 0 && missing.is_empty() {
            return None;
        }

        let issue = MissingValueIssue {
            null_count: missing.len(),
            total_measurements: total,
            null_values: missing
                .iter()
                .take(EXAMPLE_LIMIT)
                .map(|m| MeasurementSample::from(*m))
                .collect(),
        };

        Some(if total == 0 {
            IssueDetail::NoData(issue)
        } else {
            IssueDetail::NullValues(issue)
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
        let total = source.count_all(device.id, &self.parameter, window).await?;

        Ok(self.detect(&series, total))
    }

    pub fn title(&self, device: &Device) -> String {
        format!(
            "Alert: missing values for {} on device {}",
            self.parameter, device.code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::series;

    fn rule() -> MissingValueRule {
        MissingValueRule::new("DHT22 [Temperatura (°C)]")
    }

    #[test]
    fn test_no_rows_is_no_data() {
        let detail = rule().detect(&[], 0).unwrap();
        match detail {
            IssueDetail::NoData(issue) => {
                assert_eq!(issue.null_count, 0);
                assert_eq!(issue.total_measurements, 0);
            }
            other => panic!("unexpected issue: {other:?}"),
        }
    }

    #[test]
    fn test_blank_and_zero_are_null_values() {
        let rows = series(&[Some("21.4"), None, Some(""), Some("0"), Some("22.0")]);
        let detail = rule().detect(&rows, rows.len() as i64).unwrap();

        let IssueDetail::NullValues(issue) = detail else {
            panic!("expected null_values");
        };
        assert_eq!(issue.null_count, 3);
        assert_eq!(issue.total_measurements, 5);
        assert_eq!(detail_ids(&issue), vec![2, 3, 4]);
    }

    #[test]
    fn test_valid_series_not_flagged() {
        let rows = series(&[Some("21.4"), Some("22.0"), Some("ERR")]);
        assert!(rule().detect(&rows, 3).is_none());
    }

    #[test]
    fn test_examples_capped() {
        let rows = series(&[None; 8]);
        let Some(IssueDetail::NullValues(issue)) = rule().detect(&rows, 8) else {
            panic!("expected null_values");
        };
        assert_eq!(issue.null_count, 8);
        assert_eq!(issue.null_values.len(), EXAMPLE_LIMIT);
    }

    fn detail_ids(issue: &MissingValueIssue) -> Vec<i64> {
        issue.null_values.iter().map(|s| s.id_dato).collect()
    }
}
