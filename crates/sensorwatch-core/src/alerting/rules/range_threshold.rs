//! Single-sided comparison against a fixed limit

use serde::Serialize;
use serde_json::{json, Value};

use crate::db::MeasurementSource;
use crate::error::Result;
use crate::models::{Device, EvaluationWindow, IssueDetail, Measurement, SortOrder};

use super::{ConfigReader, NumericSample, Operator};

const EXAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct RangeThresholdRule {
    pub parameter: String,
    pub operador: Operator,
    pub limite: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdIssue {
    pub threshold_violations: usize,
    /// Non-null readings in the window
    pub total_measurements: usize,
    pub operador: Operator,
    pub limite: f64,
    pub violating_values: Vec<NumericSample>,
}

impl RangeThresholdRule {
    pub(super) fn parse(parameter: String, config: &ConfigReader<'_>) -> Result<Self> {
        Ok(Self {
            parameter,
            operador: config.operator("operador")?.unwrap_or(Operator::Gt),
            limite: config.required_number("limite")?,
        })
    }

    pub fn config_json(&self) -> Value {
        json!({ "operador": self.operador, "limite": self.limite })
    }

    /// Flag numeric readings for which `value <operador> limite` holds
    pub fn detect(&self, series: &[Measurement]) -> Option<ThresholdIssue> {
        let violations: Vec<NumericSample> = series
            .iter()
            .filter_map(|m| m.numeric().map(|value| (m, value)))
            .filter(|(_, value)| self.operador.holds(*value, self.limite))
            .map(|(m, value)| NumericSample::new(m, value))
            .collect();

        if violations.is_empty() {
            return None;
        }

        Some(ThresholdIssue {
            threshold_violations: violations.len(),
            total_measurements: series.iter().filter(|m| m.value.is_some()).count(),
            operador: self.operador,
            limite: self.limite,
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

        Ok(self.detect(&series).map(IssueDetail::ThresholdExceeded))
    }

    pub fn title(&self, device: &Device) -> String {
        format!(
            "Alert: threshold exceeded for {} on device {} ({} {})",
            self.parameter, device.code, self.operador, self.limite
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::ValidationKind;
    use crate::testing::numeric_series;
    use rstest::rstest;
    use serde_json::json;

    fn rule(config: Value) -> Result<RangeThresholdRule> {
        let reader = ConfigReader::new(ValidationKind::RangeThreshold, &config)?;
        RangeThresholdRule::parse("p".into(), &reader)
    }

    #[test]
    fn test_greater_than_flags_single_value() {
        let rule = rule(json!({"operador": ">", "limite": 100})).unwrap();
        let issue = rule.detect(&numeric_series(&[50.0, 150.0, 99.0])).unwrap();

        assert_eq!(issue.threshold_violations, 1);
        assert_eq!(issue.total_measurements, 3);
        assert_eq!(issue.violating_values[0].valor, 150.0);
    }

    #[test]
    fn test_missing_limit_is_invalid_config() {
        let err = rule(json!({"operador": ">"})).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref reason, .. } if reason == "limite is required"));
    }

    #[test]
    fn test_defaults_and_string_limit() {
        let rule = rule(json!({"limite": "30.5"})).unwrap();
        assert_eq!(rule.operador, Operator::Gt);
        assert_eq!(rule.limite, 30.5);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        assert!(rule(json!({"operador": "=>", "limite": 1})).is_err());
    }

    #[rstest]
    #[case("<", 2)]
    #[case("<=", 3)]
    #[case("=", 1)]
    #[case("!=", 3)]
    #[case(">=", 2)]
    fn test_operators(#[case] op: &str, #[case] expected: usize) {
        let rule = rule(json!({"operador": op, "limite": 20})).unwrap();
        let issue = rule.detect(&numeric_series(&[10.0, 15.0, 20.0, 25.0]));
        assert_eq!(issue.map_or(0, |i| i.threshold_violations), expected);
    }

    #[test]
    fn test_non_numeric_ignored() {
        let rule = rule(json!({"limite": 0})).unwrap();
        let rows = crate::testing::series(&[Some("abc"), None, Some("-1")]);
        assert!(rule.detect(&rows).is_none());
    }

    #[test]
    fn test_examples_capped_at_ten() {
        let rule = rule(json!({"operador": ">", "limite": 100})).unwrap();
        let mut values = vec![150.0; 15];
        values.extend([50.0, 99.0]);
        let issue = rule.detect(&numeric_series(&values)).unwrap();

        assert_eq!(issue.threshold_violations, 15);
        assert_eq!(issue.total_measurements, 17);
        assert_eq!(issue.violating_values.len(), 10);
    }
}
