//! Validation results produced by alert evaluation runs
//!
//! None of these are persisted; they are returned to the caller of a run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::alerting::rules::{
    BetweenRangeIssue, CrossParameterIssue, MissingValueIssue, RateOfChangeIssue,
    StuckValueIssue, ThresholdIssue,
};
use crate::error::Error;
use crate::models::alert::ValidationKind;
use crate::models::measurement::{Device, EvaluationWindow};

/// Outcome of evaluating one alert definition
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    Success(ValidationReport),
    Error(ValidationFailure),
}

impl ValidationResult {
    /// Build an error result from a domain or upstream error
    pub fn failure(alert_id: impl Into<String>, error: &Error) -> Self {
        Self::Error(ValidationFailure {
            alert_id: alert_id.into(),
            error_kind: error.kind().to_string(),
            message: error.to_string(),
        })
    }

    pub fn alert_id(&self) -> &str {
        match self {
            Self::Success(report) => &report.alert_id,
            Self::Error(failure) => &failure.alert_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The success report, if any
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            Self::Success(report) => Some(report),
            Self::Error(_) => None,
        }
    }
}

/// Details of a completed evaluation
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub alert_id: String,
    pub validation_type: ValidationKind,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    /// Left and right parameter of a cross-parameter rule
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
    /// Parsed rule config with defaults filled in
    pub rule_config: Value,
    pub validation_time: DateTime<Utc>,
    pub period_checked: EvaluationWindow,
    pub total_devices_checked: usize,
    pub devices_with_issues: usize,
    pub total_violations: usize,
    pub issues_found: Vec<DeviceIssue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_devices: Vec<DeviceFailure>,
    pub email_notifications: NotificationSummary,
}

/// Why an evaluation could not complete
#[derive(Debug, Clone, Serialize)]
pub struct ValidationFailure {
    pub alert_id: String,
    pub error_kind: String,
    pub message: String,
}

/// A device flagged by a rule
#[derive(Debug, Clone, Serialize)]
pub struct DeviceIssue {
    pub device_id: i64,
    pub codigo_interno: String,
    #[serde(flatten)]
    pub detail: IssueDetail,
}

impl DeviceIssue {
    pub fn new(device: &Device, detail: IssueDetail) -> Self {
        Self {
            device_id: device.id,
            codigo_interno: device.code.clone(),
            detail,
        }
    }
}

/// Evaluator-specific issue payload
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "issue_type", rename_all = "snake_case")]
pub enum IssueDetail {
    NoData(MissingValueIssue),
    NullValues(MissingValueIssue),
    ThresholdExceeded(ThresholdIssue),
    RangeViolation(BetweenRangeIssue),
    RateOfChangeExceeded(RateOfChangeIssue),
    StuckValue(StuckValueIssue),
    CrossParameterViolation(CrossParameterIssue),
}

impl IssueDetail {
    /// Number of offending readings, periods or pairs behind the issue
    pub fn violation_count(&self) -> usize {
        match self {
            Self::NoData(_) => 0,
            Self::NullValues(issue) => issue.null_count,
            Self::ThresholdExceeded(issue) => issue.threshold_violations,
            Self::RangeViolation(issue) => issue.range_violations,
            Self::RateOfChangeExceeded(issue) => issue.flagged_points,
            Self::StuckValue(issue) => issue.stuck_periods,
            Self::CrossParameterViolation(issue) => issue.violations,
        }
    }
}

/// A device whose measurements could not be inspected
#[derive(Debug, Clone, Serialize)]
pub struct DeviceFailure {
    pub device_id: i64,
    pub codigo_interno: String,
    pub error_kind: String,
    pub message: String,
}

impl DeviceFailure {
    pub fn new(device: &Device, error: &Error) -> Self {
        Self {
            device_id: device.id,
            codigo_interno: device.code.clone(),
            error_kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one notification send
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    /// At least one recipient accepted the message
    pub success: bool,
    pub total_recipients: usize,
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub recipients: Vec<RecipientDelivery>,
    /// Connection-level failure, when the session never opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-recipient delivery detail
#[derive(Debug, Clone, Serialize)]
pub struct RecipientDelivery {
    pub recipient: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Notification for one flagged device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceNotification {
    pub device: String,
    pub email_result: DeliveryReport,
}

/// Aggregated notification outcome of one evaluation
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationSummary {
    pub total_emails_sent: usize,
    pub total_emails_failed: usize,
    pub devices_notified: usize,
    pub email_details: Vec<DeviceNotification>,
}

impl NotificationSummary {
    pub fn from_details(email_details: Vec<DeviceNotification>) -> Self {
        Self {
            total_emails_sent: email_details.iter().map(|d| d.email_result.emails_sent).sum(),
            total_emails_failed: email_details
                .iter()
                .map(|d| d.email_result.emails_failed)
                .sum(),
            devices_notified: email_details.len(),
            email_details,
        }
    }
}

/// One entry of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct AlertRunOutcome {
    pub alert_id: String,
    pub result: ValidationResult,
}

/// Result of RunAllActive / RunByProject; always a success envelope
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub total_alerts_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub validation_results: Vec<AlertRunOutcome>,
}

impl BatchReport {
    pub fn new(project_id: Option<String>, validation_results: Vec<AlertRunOutcome>) -> Self {
        let message = validation_results.is_empty().then(|| match &project_id {
            Some(project) => format!("No active alerts for project {project}"),
            None => "No active alerts to validate".to_string(),
        });

        Self {
            status: "success",
            project_id,
            total_alerts_processed: validation_results.len(),
            message,
            validation_results,
        }
    }
}
