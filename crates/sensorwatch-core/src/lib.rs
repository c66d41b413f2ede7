//! # SensorWatch
//!
//! Rule-based alert validation for sensor measurement data.
//!
//! SensorWatch keeps a store of user-authored alert definitions, evaluates
//! them against the last day of device measurements and emails the
//! recipients of every device a rule flags.
//!
//! ## Architecture
//!
//! - **Alert store**: JSON file of alert definitions with dedup on create
//! - **Measurement source**: read-only MySQL queries over devices and readings
//! - **Rules**: six evaluators (missing, threshold, band, rate, stuck, cross)
//! - **Notifier**: SMTP delivery with per-recipient outcome
//! - **API**: REST endpoints for definitions and validation runs
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the HTTP API
//! sensorwatch serve
//!
//! # Run every active alert once
//! sensorwatch alerts validate-all
//! ```

#![warn(clippy::all)]

pub mod alerting;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertEvaluator, AlertStore, JsonFileAlertStore, NotificationDispatcher};
    pub use crate::config::Config;
    pub use crate::db::{MeasurementSource, MySqlMeasurementStore};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
}
