//! Alert definition models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::measurement::DeviceFilter;

/// Detection strategy selected by an alert definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    /// Null, empty or zero readings, or no readings at all
    MissingValue,
    /// Single-sided comparison against a limit
    RangeThreshold,
    /// Inside/outside a `[min, max]` band
    BetweenRange,
    /// Relative jump against the mean of preceding samples
    RateOfChange,
    /// Frozen signal over a sliding window
    StuckValue,
    /// Relation between two parameters at matching timestamps
    CrossParameterRule,
}

impl ValidationKind {
    /// Every supported kind
    pub const ALL: [ValidationKind; 6] = [
        Self::MissingValue,
        Self::RangeThreshold,
        Self::BetweenRange,
        Self::RateOfChange,
        Self::StuckValue,
        Self::CrossParameterRule,
    ];

    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingValue => "missing_value",
            Self::RangeThreshold => "range_threshold",
            Self::BetweenRange => "between_range",
            Self::RateOfChange => "rate_of_change",
            Self::StuckValue => "stuck_value",
            Self::CrossParameterRule => "cross_parameter_rule",
        }
    }

    /// Whether definitions of this kind must name a `parameter`
    pub fn requires_parameter(&self) -> bool {
        !matches!(self, Self::CrossParameterRule)
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnsupportedValidationKind(s.to_string()))
    }
}

/// Notification recipients, either a single address or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    /// Non-blank addresses in declaration order
    pub fn addresses(&self) -> Vec<String> {
        let raw: Vec<&String> = match self {
            Self::One(address) => vec![address],
            Self::Many(addresses) => addresses.iter().collect(),
        };

        raw.into_iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect()
    }
}

/// A persisted, user-authored alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDefinition {
    /// Caller-supplied unique identifier
    #[serde(default)]
    pub id: String,

    /// Project the rule belongs to
    #[serde(deserialize_with = "string_or_number")]
    pub project_id: String,

    /// Free-form category label
    #[serde(default)]
    pub rule_type: String,

    /// Raw validation kind; resolved through [`AlertDefinition::kind`]
    #[serde(alias = "validationId")]
    pub validation_kind: String,

    /// Composite signal label (`model [variable (unit)]`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,

    /// Kind-specific parameter bag
    #[serde(default = "empty_object")]
    pub config: Value,

    #[serde(default = "default_true")]
    pub apply_to_all_devices: bool,

    /// Device codes checked when `apply_to_all_devices` is false
    #[serde(default)]
    pub target_devices: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Recipients>,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Last evaluation attempt
    #[serde(
        default,
        alias = "ultima_validacion",
        with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub ultima_validacion: Option<DateTime<Utc>>,

    /// Fields this service does not interpret, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AlertDefinition {
    /// Resolve the validation kind
    pub fn kind(&self) -> Result<ValidationKind> {
        self.validation_kind.parse()
    }

    /// Recipients declared on the definition (may be empty)
    pub fn recipients(&self) -> Vec<String> {
        self.email
            .as_ref()
            .map(Recipients::addresses)
            .unwrap_or_default()
    }

    /// Which devices of the project this rule covers
    pub fn device_filter(&self) -> DeviceFilter {
        if self.apply_to_all_devices {
            DeviceFilter::All
        } else {
            DeviceFilter::Codes(self.target_devices.clone())
        }
    }

    /// Whether both definitions share the dedup tuple
    /// (`projectId`, `ruleType`, `validationKind`, `parameter`, `config`)
    pub fn is_duplicate_of(&self, other: &AlertDefinition) -> bool {
        self.project_id == other.project_id
            && self.rule_type == other.rule_type
            && self.validation_kind == other.validation_kind
            && self.parameter == other.parameter
            && values_equivalent(&self.config, &other.config)
    }

    /// Structural checks applied before a definition is stored
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("id must not be empty"));
        }
        if self.project_id.trim().is_empty() {
            return Err(Error::validation("projectId is required"));
        }

        let kind = self
            .kind()
            .map_err(|_| Error::validation(format!(
                "validationKind '{}' is not one of: {}",
                self.validation_kind,
                ValidationKind::ALL.map(|k| k.as_str()).join(", ")
            )))?;

        if kind.requires_parameter()
            && self.parameter.as_deref().map_or(true, |p| p.trim().is_empty())
        {
            return Err(Error::validation(format!("parameter is required for {kind}")));
        }

        if !self.config.is_object() {
            return Err(Error::validation("config must be a JSON object"));
        }

        if !self.apply_to_all_devices && self.target_devices.is_empty() {
            return Err(Error::validation(
                "targetDevices must not be empty when applyToAllDevices is false",
            ));
        }

        Ok(())
    }
}

/// Partial update of an alert definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDefinitionPatch {
    pub active: Option<bool>,
    pub email: Option<Recipients>,
    pub target_devices: Option<Vec<String>>,
    pub apply_to_all_devices: Option<bool>,
    pub config: Option<Value>,
    pub rule_type: Option<String>,
    pub parameter: Option<String>,
}

impl AlertDefinitionPatch {
    /// Apply the present fields onto a definition
    pub fn apply_to(self, definition: &mut AlertDefinition) {
        if let Some(active) = self.active {
            definition.active = active;
        }
        if let Some(email) = self.email {
            definition.email = Some(email);
        }
        if let Some(targets) = self.target_devices {
            definition.target_devices = targets;
        }
        if let Some(all) = self.apply_to_all_devices {
            definition.apply_to_all_devices = all;
        }
        if let Some(config) = self.config {
            definition.config = config;
        }
        if let Some(rule_type) = self.rule_type {
            definition.rule_type = rule_type;
        }
        if let Some(parameter) = self.parameter {
            definition.parameter = Some(parameter);
        }
    }
}

/// Deep equality where numbers compare by value (`1` equals `1.0`)
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equivalent(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equivalent(x, y)))
        }
        _ => a == b,
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn default_true() -> bool {
    true
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Timestamps written as RFC 3339; naive ISO strings read as UTC
mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
