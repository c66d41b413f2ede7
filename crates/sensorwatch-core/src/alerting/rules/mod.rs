//! Detection strategies, one per validation kind
//!
//! A [`Rule`] is parsed from an alert definition once per run. Parsing is
//! where config problems surface; inspection only fails on store errors.

mod between_range;
mod cross_parameter;
mod missing_value;
mod range_threshold;
mod rate_of_change;
mod stuck_value;

pub use between_range::{BetweenRangeIssue, BetweenRangeRule, RangeSide};
pub use cross_parameter::{CrossParameterIssue, CrossParameterRule, PairViolation};
pub use missing_value::{MissingValueIssue, MissingValueRule};
pub use range_threshold::{RangeThresholdRule, ThresholdIssue};
pub use rate_of_change::{RateOfChangeIssue, RateOfChangeRule, RateSpike};
pub use stuck_value::{StuckPeriod, StuckValueIssue, StuckValueRule};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::MeasurementSource;
use crate::error::{Error, Result};
use crate::models::{AlertDefinition, Device, EvaluationWindow, IssueDetail, Measurement, ValidationKind};

/// Absolute difference under which two readings count as equal
pub const EQUALITY_TOLERANCE: f64 = 1e-4;

/// Comparison operator used by thresholds and cross-parameter relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Self::Gt,
        Self::Lt,
        Self::Eq,
        Self::Lte,
        Self::Gte,
        Self::Ne,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "=",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::Ne => "!=",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|op| op.as_str() == raw)
    }

    /// Evaluate `left <op> right`
    pub fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Lt => left < right,
            Self::Eq => (left - right).abs() < EQUALITY_TOLERANCE,
            Self::Lte => left <= right,
            Self::Gte => left >= right,
            Self::Ne => (left - right).abs() >= EQUALITY_TOLERANCE,
        }
    }

    fn choices() -> String {
        Self::ALL.map(|op| op.as_str()).join(", ")
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reading reported with its parsed value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSample {
    pub id_dato: i64,
    pub fecha: DateTime<Utc>,
    pub valor: f64,
}

impl NumericSample {
    fn new(measurement: &Measurement, valor: f64) -> Self {
        Self {
            id_dato: measurement.id,
            fecha: measurement.timestamp,
            valor,
        }
    }
}

/// A validated rule ready to run against devices
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    MissingValue(MissingValueRule),
    RangeThreshold(RangeThresholdRule),
    BetweenRange(BetweenRangeRule),
    RateOfChange(RateOfChangeRule),
    StuckValue(StuckValueRule),
    CrossParameter(CrossParameterRule),
}

impl Rule {
    /// Resolve the kind and parse its config
    pub fn from_definition(definition: &AlertDefinition) -> Result<Self> {
        let kind = definition.kind()?;
        let reader = ConfigReader::new(kind, &definition.config)?;

        let parameter = || -> Result<String> {
            definition
                .parameter
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .ok_or_else(|| reader.error("parameter is required"))
        };

        Ok(match kind {
            ValidationKind::MissingValue => Self::MissingValue(MissingValueRule::new(parameter()?)),
            ValidationKind::RangeThreshold => {
                Self::RangeThreshold(RangeThresholdRule::parse(parameter()?, &reader)?)
            }
            ValidationKind::BetweenRange => {
                Self::BetweenRange(BetweenRangeRule::parse(parameter()?, &reader)?)
            }
            ValidationKind::RateOfChange => {
                Self::RateOfChange(RateOfChangeRule::parse(parameter()?, &reader)?)
            }
            ValidationKind::StuckValue => {
                Self::StuckValue(StuckValueRule::parse(parameter()?, &reader)?)
            }
            ValidationKind::CrossParameterRule => {
                Self::CrossParameter(CrossParameterRule::parse(&reader)?)
            }
        })
    }

    pub fn kind(&self) -> ValidationKind {
        match self {
            Self::MissingValue(_) => ValidationKind::MissingValue,
            Self::RangeThreshold(_) => ValidationKind::RangeThreshold,
            Self::BetweenRange(_) => ValidationKind::BetweenRange,
            Self::RateOfChange(_) => ValidationKind::RateOfChange,
            Self::StuckValue(_) => ValidationKind::StuckValue,
            Self::CrossParameter(_) => ValidationKind::CrossParameterRule,
        }
    }

    /// The single parameter inspected, if the kind has one
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::MissingValue(rule) => Some(&rule.parameter),
            Self::RangeThreshold(rule) => Some(&rule.parameter),
            Self::BetweenRange(rule) => Some(&rule.parameter),
            Self::RateOfChange(rule) => Some(&rule.parameter),
            Self::StuckValue(rule) => Some(&rule.parameter),
            Self::CrossParameter(_) => None,
        }
    }

    /// Both sides of a cross-parameter relation
    pub fn parameters(&self) -> Vec<String> {
        match self {
            Self::CrossParameter(rule) => vec![rule.izq.clone(), rule.der.clone()],
            _ => Vec::new(),
        }
    }

    /// Effective config with defaults applied
    pub fn rule_config(&self) -> Value {
        match self {
            Self::MissingValue(_) => Value::Object(Map::new()),
            Self::RangeThreshold(rule) => rule.config_json(),
            Self::BetweenRange(rule) => rule.config_json(),
            Self::RateOfChange(rule) => rule.config_json(),
            Self::StuckValue(rule) => rule.config_json(),
            Self::CrossParameter(rule) => rule.config_json(),
        }
    }

    /// Subject and body of the notification for a flagged device
    pub fn notification_title(&self, device: &Device) -> String {
        match self {
            Self::MissingValue(rule) => rule.title(device),
            Self::RangeThreshold(rule) => rule.title(device),
            Self::BetweenRange(rule) => rule.title(device),
            Self::RateOfChange(rule) => rule.title(device),
            Self::StuckValue(rule) => rule.title(device),
            Self::CrossParameter(rule) => rule.title(device),
        }
    }

    /// Query the device's data and apply the detection rule
    pub async fn inspect(
        &self,
        source: &dyn MeasurementSource,
        device: &Device,
        window: &EvaluationWindow,
    ) -> Result<Option<IssueDetail>> {
        match self {
            Self::MissingValue(rule) => rule.inspect(source, device, window).await,
            Self::RangeThreshold(rule) => rule.inspect(source, device, window).await,
            Self::BetweenRange(rule) => rule.inspect(source, device, window).await,
            Self::RateOfChange(rule) => rule.inspect(source, device, window).await,
            Self::StuckValue(rule) => rule.inspect(source, device, window).await,
            Self::CrossParameter(rule) => rule.inspect(source, device, window).await,
        }
    }
}

/// Field access over a rule's config object with per-field errors
pub struct ConfigReader<'a> {
    kind: ValidationKind,
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> ConfigReader<'a> {
    pub fn new(kind: ValidationKind, config: &'a Value) -> Result<Self> {
        let fields = match config {
            Value::Object(map) => Some(map),
            Value::Null => None,
            _ => return Err(Error::invalid_config(kind.as_str(), "config must be a JSON object")),
        };
        Ok(Self { kind, fields })
    }

    pub fn error(&self, reason: impl Into<String>) -> Error {
        Error::invalid_config(self.kind.as_str(), reason)
    }

    /// A present, non-null field
    fn get(&self, name: &str) -> Option<&'a Value> {
        self.fields
            .and_then(|map| map.get(name))
            .filter(|value| !value.is_null())
    }

    /// A number, or a string holding one
    pub fn number(&self, name: &str) -> Result<Option<f64>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => crate::models::parse_numeric(s),
            _ => None,
        };
        parsed
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| self.error(format!("{name} must be a number")))
    }

    pub fn required_number(&self, name: &str) -> Result<f64> {
        self.number(name)?
            .ok_or_else(|| self.error(format!("{name} is required")))
    }

    /// A whole number, also accepted as `3.0` or `"3"`
    pub fn integer(&self, name: &str) -> Result<Option<i64>> {
        match self.number(name) {
            Ok(Some(n)) if n.fract() == 0.0 => Ok(Some(n as i64)),
            Ok(None) => Ok(None),
            _ => Err(self.error(format!("{name} must be an integer"))),
        }
    }

    /// A boolean, also accepted as `"true"` / `"false"`
    pub fn boolean(&self, name: &str) -> Result<Option<bool>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        match value {
            Value::Bool(b) => Ok(Some(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
            _ => Err(self.error(format!("{name} must be a boolean"))),
        }
    }

    /// A non-blank string
    pub fn text(&self, name: &str) -> Result<Option<&'a str>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        match value {
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => Ok(Some(s.trim())),
            _ => Err(self.error(format!("{name} must be a string"))),
        }
    }

    pub fn operator(&self, name: &str) -> Result<Option<Operator>> {
        match self.text(name)? {
            None => Ok(None),
            Some(raw) => Operator::parse(raw).map(Some).ok_or_else(|| {
                self.error(format!(
                    "{name} must be one of: {}",
                    Operator::choices()
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: Value) -> AlertDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_operator_tolerance() {
        assert!(Operator::Eq.holds(1.0, 1.00005));
        assert!(!Operator::Eq.holds(1.0, 1.001));
        assert!(Operator::Ne.holds(1.0, 1.001));
        assert!(!Operator::Ne.holds(2.0, 2.0));
        assert!(Operator::Lte.holds(5.0, 5.0));
        assert!(!Operator::Gt.holds(5.0, 5.0));
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse(" <= "), Some(Operator::Lte));
        assert_eq!(Operator::parse("=>"), None);
        assert_eq!(serde_json::to_value(Operator::Ne).unwrap(), json!("!="));
    }

    #[test]
    fn test_every_kind_parses() {
        let configs = [
            ("missing_value", json!({})),
            ("range_threshold", json!({"limite": 10})),
            ("between_range", json!({"min": 0, "max": 40})),
            ("rate_of_change", json!({})),
            ("stuck_value", json!({})),
            ("cross_parameter_rule", json!({"izq": "A", "der": "B", "relacion": "<="})),
        ];

        for (kind, config) in configs {
            let def = definition(json!({
                "id": "a", "projectId": "1", "validationKind": kind,
                "parameter": "p", "config": config
            }));
            let rule = Rule::from_definition(&def).unwrap();
            assert_eq!(rule.kind().as_str(), kind);
        }
    }

    #[test]
    fn test_missing_parameter_is_invalid_config() {
        let def = definition(json!({
            "id": "a", "projectId": "1", "validationKind": "range_threshold",
            "config": {"limite": 10}
        }));
        let err = Rule::from_definition(&def).unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let def = definition(json!({
            "id": "a", "projectId": "1", "validationKind": "fourier", "parameter": "p"
        }));
        assert!(matches!(
            Rule::from_definition(&def),
            Err(Error::UnsupportedValidationKind(_))
        ));
    }

    #[test]
    fn test_reader_field_errors() {
        let config = json!({"a": "12.5", "b": "x", "c": 3.0, "d": "TRUE", "e": null});
        let reader = ConfigReader::new(ValidationKind::BetweenRange, &config).unwrap();

        assert_eq!(reader.number("a").unwrap(), Some(12.5));
        assert_eq!(
            reader.number("b").unwrap_err().to_string(),
            "Invalid between_range config: b must be a number"
        );
        assert_eq!(reader.integer("c").unwrap(), Some(3));
        assert!(reader.integer("a").is_err());
        assert_eq!(reader.boolean("d").unwrap(), Some(true));
        assert_eq!(reader.number("e").unwrap(), None);
        assert!(reader.required_number("missing").is_err());
    }

    #[test]
    fn test_non_object_config_rejected() {
        let config = json!([1, 2]);
        assert!(ConfigReader::new(ValidationKind::StuckValue, &config).is_err());
    }
}
