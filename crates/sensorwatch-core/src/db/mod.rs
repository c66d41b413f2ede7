//! Measurement store access
//!
//! The alert engine only reads measurements. [`MeasurementSource`] is the
//! narrow query contract it depends on; [`MySqlMeasurementStore`] implements
//! it over the relational sensor schema.

mod mysql;

pub use mysql::MySqlMeasurementStore;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Device, DeviceFilter, EvaluationWindow, Measurement, PairedMeasurement, SortOrder};

/// Read-only queries the alert engine issues against measurement data
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Devices of a project matching the filter, possibly none
    async fn query_devices(&self, project_id: &str, filter: &DeviceFilter) -> Result<Vec<Device>>;

    /// Devices of a project matching the filter; an empty match is an error
    async fn devices_for_project(
        &self,
        project_id: &str,
        filter: &DeviceFilter,
    ) -> Result<Vec<Device>> {
        let devices = self.query_devices(project_id, filter).await?;
        if devices.is_empty() {
            return Err(Error::NoDevicesFound(project_id.to_string()));
        }
        Ok(devices)
    }

    /// Every reading of `parameter` on the device within the window
    async fn series_for_parameter(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
        order: SortOrder,
    ) -> Result<Vec<Measurement>>;

    /// Row count within the window, regardless of value validity
    async fn count_all(
        &self,
        device_id: i64,
        parameter: &str,
        window: &EvaluationWindow,
    ) -> Result<i64>;

    /// Readings of two parameters joined on exact timestamp, ascending
    async fn paired_series(
        &self,
        device_id: i64,
        left: &str,
        right: &str,
        window: &EvaluationWindow,
    ) -> Result<Vec<PairedMeasurement>>;

    /// Check connectivity
    async fn health_check(&self) -> Result<()>;
}
