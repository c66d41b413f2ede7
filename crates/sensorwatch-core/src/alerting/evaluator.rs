//! Alert evaluation: picks definitions, runs their rule, notifies, records

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::AlertingConfig;
use crate::db::MeasurementSource;
use crate::error::{Error, Result};
use crate::models::{
    AlertDefinition, AlertRunOutcome, BatchReport, Device, DeviceFailure, DeviceFilter,
    DeviceIssue, DeviceNotification, EvaluationWindow, IssueDetail, Measurement,
    NotificationSummary, PairedMeasurement, SortOrder, ValidationReport, ValidationResult,
};

use super::notifier::NotificationDispatcher;
use super::repository::AlertStore;
use super::rules::Rule;
use super::window::{Clock, SystemClock, WindowPolicy};

/// Runs alert definitions against measurement data
pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
    source: Arc<dyn MeasurementSource>,
    notifier: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    window: WindowPolicy,
    run_timeout: Duration,
    query_timeout: Duration,
    device_concurrency: usize,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        source: Arc<dyn MeasurementSource>,
        notifier: NotificationDispatcher,
        config: &AlertingConfig,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            clock: Arc::new(SystemClock),
            window: WindowPolicy::new(config.window_length()),
            run_timeout: config.run_timeout,
            query_timeout: config.query_timeout,
            device_concurrency: config.device_concurrency.max(1),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Evaluate one definition by id
    ///
    /// Missing, inactive and unsupported definitions are errors; anything
    /// that goes wrong once evaluation starts is an error-status result.
    pub async fn run_one(&self, alert_id: &str) -> Result<ValidationResult> {
        let definition = self.store.get(alert_id).await?;
        if !definition.active {
            return Err(Error::InactiveAlert(definition.id));
        }
        definition.kind()?;

        Ok(self.run_definition(&definition).await)
    }

    /// Evaluate every active definition
    pub async fn run_all_active(&self) -> Result<BatchReport> {
        let definitions = self.store.list_active(None).await?;
        info!(count = definitions.len(), "Validating all active alerts");

        Ok(BatchReport::new(None, self.run_batch(definitions).await))
    }

    /// Evaluate the active definitions of one project
    pub async fn run_by_project(&self, project_id: &str) -> Result<BatchReport> {
        let definitions = self.store.list_active(Some(project_id)).await?;
        info!(project_id, count = definitions.len(), "Validating project alerts");

        Ok(BatchReport::new(
            Some(project_id.to_string()),
            self.run_batch(definitions).await,
        ))
    }

    async fn run_batch(&self, definitions: Vec<AlertDefinition>) -> Vec<AlertRunOutcome> {
        let mut outcomes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let result = self.run_definition(&definition).await;
            outcomes.push(AlertRunOutcome {
                alert_id: definition.id,
                result,
            });
        }
        outcomes
    }

    /// Evaluate one definition and record the attempt
    ///
    /// `run_timeout` bounds detection only; once notifications start going
    /// out the run completes and is recorded.
    pub async fn run_definition(&self, definition: &AlertDefinition) -> ValidationResult {
        let now = self.clock.now();

        let detection = tokio::time::timeout(self.run_timeout, self.detect(definition, now)).await;
        let outcome = match detection {
            Ok(Ok(detection)) => Ok(self.notify(definition, now, detection).await),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::timeout(format!("evaluation of alert {}", definition.id))),
        };

        let record = match &outcome {
            Ok(_) => true,
            Err(e) => !is_transport_error(e),
        };
        if record {
            if let Err(e) = self.store.update_last_validation(&definition.id, now).await {
                warn!(alert_id = %definition.id, error = %e, "Failed to record last validation");
            }
        }

        match outcome {
            Ok(report) => ValidationResult::Success(report),
            Err(e) => {
                error!(alert_id = %definition.id, error = %e, "Alert evaluation failed");
                ValidationResult::failure(definition.id.clone(), &e)
            }
        }
    }

    /// Resolve devices and run the rule on each of them
    async fn detect(&self, definition: &AlertDefinition, now: DateTime<Utc>) -> Result<Detection> {
        let rule = Rule::from_definition(definition)?;
        let window = self.window.window_at(now);
        let source = TimedSource {
            inner: self.source.clone(),
            timeout: self.query_timeout,
        };

        let devices = source
            .devices_for_project(&definition.project_id, &definition.device_filter())
            .await?;
        let total_devices = devices.len();

        debug!(
            alert_id = %definition.id,
            kind = %rule.kind(),
            devices = total_devices,
            "Inspecting devices"
        );

        let rule_ref = &rule;
        let source_ref = &source;
        let window_ref = &window;
        let inspected: Vec<(Device, Result<Option<IssueDetail>>)> = stream::iter(devices)
            .map(|device| async move {
                let outcome = rule_ref.inspect(source_ref, &device, window_ref).await;
                (device, outcome)
            })
            .buffered(self.device_concurrency)
            .collect()
            .await;

        let mut issues = Vec::new();
        let mut failures = Vec::new();
        let mut first_error = None;
        for (device, outcome) in inspected {
            match outcome {
                Ok(Some(detail)) => {
                    debug!(
                        device = %device.code,
                        violations = detail.violation_count(),
                        "Device flagged"
                    );
                    issues.push(DeviceIssue::new(&device, detail));
                }
                Ok(None) => debug!(device = %device.code, "Device clean"),
                Err(e) => {
                    warn!(device = %device.code, error = %e, "Device inspection failed");
                    failures.push(DeviceFailure::new(&device, &e));
                    first_error.get_or_insert(e);
                }
            }
        }

        if failures.len() == total_devices {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        Ok(Detection {
            rule,
            window,
            total_devices,
            issues,
            failures,
        })
    }

    /// Notify recipients about every flagged device and build the report
    async fn notify(
        &self,
        definition: &AlertDefinition,
        now: DateTime<Utc>,
        detection: Detection,
    ) -> ValidationReport {
        let Detection {
            rule,
            window,
            total_devices,
            issues,
            failures,
        } = detection;

        let recipients = definition.recipients();
        let mut email_details = Vec::with_capacity(issues.len());
        for issue in &issues {
            let device = Device::new(issue.device_id, issue.codigo_interno.clone());
            let title = rule.notification_title(&device);
            let email_result = self.notifier.send(&title, &recipients).await;
            email_details.push(DeviceNotification {
                device: device.code,
                email_result,
            });
        }

        let total_violations = issues.iter().map(|i| i.detail.violation_count()).sum();

        info!(
            alert_id = %definition.id,
            kind = %rule.kind(),
            devices = total_devices,
            flagged = issues.len(),
            failed = failures.len(),
            "Alert evaluated"
        );

        ValidationReport {
            alert_id: definition.id.clone(),
            validation_type: rule.kind(),
            project_id: definition.project_id.clone(),
            parameter: rule.parameter().map(String::from),
            parameters: rule.parameters(),
            rule_config: rule.rule_config(),
            validation_time: now,
            period_checked: window,
            total_devices_checked: total_devices,
            devices_with_issues: issues.len(),
            total_violations,
            issues_found: issues,
            failed_devices: failures,
            email_notifications: NotificationSummary::from_details(email_details),
        }
    }
}

/// Rule outcome for every device, before any notification goes out
struct Detection {
    rule: Rule,
    window: EvaluationWindow,
    total_devices: usize,
    issues: Vec<DeviceIssue>,
    failures: Vec<DeviceFailure>,
}

/// Store or deadline failures, as opposed to problems with the definition itself
fn is_transport_error(error: &Error) -> bool {
    matches!(
        error,
        Error::Database(_) | Error::Timeout { .. } | Error::Io(_) | Error::Internal(_)
    )
}

/// Applies the per-query deadline to every measurement store call
struct TimedSource {
    inner: Arc<dyn MeasurementSource>,
    timeout: Duration,
}

impl TimedSource {
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>> + Send,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::timeout(operation))?
    }
}

#[async_trait]
impl MeasurementSource for TimedSource {
    async fn query_devices(&self, project_id: &str, filter: &DeviceFilter) -> Result<Vec<Device>> {
        self.bounded("device query", self.inner.query_devices(project_id, filter))
            .await
    }

    async fn series_for_parameter(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
        order: SortOrder,
    ) -> Result<Vec<Measurement>> {
        self.bounded(
            "series query",
            self.inner.series_for_parameter(device_id, parameter, window, order),
        )
        .await
    }

    async fn count_all(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
    ) -> Result<i64> {
        self.bounded("count query", self.inner.count_all(device_id, parameter, window))
            .await
    }

    async fn paired_series(
        &self,
        device_id: i64,
        left: &str,
        right: &str,
        window: &EvaluationWindow,
    ) -> Result<Vec<PairedMeasurement>> {
        self.bounded(
            "paired series query",
            self.inner.paired_series(device_id, left, right, window),
        )
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.bounded("health check", self.inner.health_check()).await
    }
}
