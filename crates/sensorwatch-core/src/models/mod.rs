//! Data models for SensorWatch

pub mod alert;
pub mod measurement;
pub mod validation;

pub use alert::*;
pub use measurement::*;
pub use validation::*;
