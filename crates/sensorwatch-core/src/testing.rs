//! Test doubles shared by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::alerting::MailTransport;
use crate::db::MeasurementSource;
use crate::error::{Error, Result};
use crate::models::{
    Device, DeviceFilter, EvaluationWindow, Measurement, PairedMeasurement, SortOrder,
};

/// "Now" used across tests
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

/// One reading per minute, oldest first, ending one minute before [`base_time`]
pub fn series(values: &[Option<&str>]) -> Vec<Measurement> {
    let n = values.len() as i64;
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let ts = base_time() - chrono::Duration::minutes(n - i as i64);
            Measurement::new(i as i64 + 1, ts, *value)
        })
        .collect()
}

pub fn numeric_series(values: &[f64]) -> Vec<Measurement> {
    let raw: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    let refs: Vec<Option<&str>> = raw.iter().map(|s| Some(s.as_str())).collect();
    series(&refs)
}

fn unavailable() -> Error {
    Error::Database(sqlx::Error::PoolTimedOut)
}

/// Measurement store held in memory
#[derive(Default)]
pub struct InMemorySource {
    devices: Vec<(String, Device)>,
    series: HashMap<(i64, String), Vec<Measurement>>,
    failing_devices: HashSet<i64>,
    down: bool,
    delay: Option<Duration>,
}

impl InMemorySource {
    pub fn with_device(mut self, project_id: &str, id: i64, code: &str) -> Self {
        self.devices.push((project_id.to_string(), Device::new(id, code)));
        self
    }

    pub fn with_series(mut self, device_id: i64, parameter: &str, rows: Vec<Measurement>) -> Self {
        self.series.insert((device_id, parameter.to_string()), rows);
        self
    }

    /// Queries for this device's measurements fail
    pub fn failing_device(mut self, device_id: i64) -> Self {
        self.failing_devices.insert(device_id);
        self
    }

    /// Every query fails
    pub fn down(mut self) -> Self {
        self.down = true;
        self
    }

    /// Every measurement query sleeps first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn rows(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
    ) -> Result<Vec<Measurement>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.down || self.failing_devices.contains(&device_id) {
            return Err(unavailable());
        }

        let mut rows: Vec<Measurement> = self
            .series
            .get(&(device_id, parameter.to_string()))
            .map(|rows| {
                rows.iter()
                    .filter(|m| window.contains(m.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|m| (m.timestamp, m.id));
        Ok(rows)
    }
}

#[async_trait]
impl MeasurementSource for InMemorySource {
    async fn query_devices(&self, project_id: &str, filter: &DeviceFilter) -> Result<Vec<Device>> {
        if self.down {
            return Err(unavailable());
        }

        Ok(self
            .devices
            .iter()
            .filter(|(project, _)| project == project_id)
            .map(|(_, device)| device)
            .filter(|device| match filter {
                DeviceFilter::All => true,
                DeviceFilter::Codes(codes) => codes.contains(&device.code),
            })
            .cloned()
            .collect())
    }

    async fn series_for_parameter(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
        order: SortOrder,
    ) -> Result<Vec<Measurement>> {
        let mut rows = self.rows(device_id, parameter, window).await?;
        if order == SortOrder::Descending {
            rows.reverse();
        }
        Ok(rows)
    }

    async fn count_all(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
    ) -> Result<i64> {
        Ok(self.rows(device_id, parameter, window).await?.len() as i64)
    }

    async fn paired_series(
        &self,
        device_id: i64,
        left: &str,
        right: &str,
        window: &EvaluationWindow,
    ) -> Result<Vec<PairedMeasurement>> {
        let lefts = self.rows(device_id, left, window).await?;
        let rights = self.rows(device_id, right, window).await?;

        Ok(lefts
            .iter()
            .flat_map(|l| {
                rights
                    .iter()
                    .filter(move |r| r.timestamp == l.timestamp)
                    .map(move |r| PairedMeasurement {
                        timestamp: l.timestamp,
                        left_value: l.value.clone(),
                        right_value: r.value.clone(),
                        left_id: l.id,
                        right_id: r.id,
                    })
            })
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        if self.down {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

/// Mail transport that records deliveries and fails on demand
#[derive(Default)]
pub struct ScriptedMailer {
    refuse_connection: bool,
    failing: HashSet<String>,
    delay: Option<Duration>,
    sessions: AtomicUsize,
    delivered: Mutex<Vec<(String, String)>>,
}

impl ScriptedMailer {
    pub fn failing_for(mut self, recipient: &str) -> Self {
        self.failing.insert(recipient.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.refuse_connection = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sessions opened so far
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Recipients that accepted a message, in order
    pub fn delivered_to(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(to, _)| to.clone())
            .collect()
    }

    /// Subjects delivered, in order
    pub fn subjects(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, subject)| subject.clone())
            .collect()
    }
}

#[async_trait]
impl MailTransport for ScriptedMailer {
    async fn connect(&self) -> Result<()> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.refuse_connection {
            return Err(Error::Notification("connection refused".into()));
        }
        Ok(())
    }

    async fn deliver(&self, recipient: &str, subject: &str, _body: &str) -> Result<()> {
        if self.failing.contains(recipient) {
            return Err(Error::Notification(format!("mailbox unavailable: {recipient}")));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string()));
        Ok(())
    }
}
