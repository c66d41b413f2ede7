//! Error types for SensorWatch

use thiserror::Error;

use crate::models::AlertDefinition;

/// Result type alias using SensorWatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for SensorWatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Measurement store error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// An alert definition with the same identity tuple already exists
    #[error("An alert with the same parameters already exists: {}", existing.id)]
    Conflict { existing: Box<AlertDefinition> },

    /// The alert definition is disabled
    #[error("Alert {0} is inactive")]
    InactiveAlert(String),

    /// The definition names a validation kind with no evaluator
    #[error("Unsupported validation kind: {0}")]
    UnsupportedValidationKind(String),

    /// Rule configuration is missing fields or out of range
    #[error("Invalid {kind} config: {reason}")]
    InvalidConfig { kind: String, reason: String },

    /// Device resolution yielded zero devices
    #[error("No devices found to validate for project {0}")]
    NoDevicesFound(String),

    /// An external call exceeded its deadline
    #[error("Timed out: {operation}")]
    Timeout { operation: String },

    /// Notification transport error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid rule config error
    pub fn invalid_config(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable discriminator reported in error-status validation results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InactiveAlert(_) => "inactive_alert",
            Self::UnsupportedValidationKind(_) => "unsupported_validation_kind",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::NoDevicesFound(_) => "no_devices_found",
            Self::Timeout { .. } => "timeout",
            Self::Notification(_) => "notification",
            Self::Internal(_) => "internal",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("range_threshold", "limite is required");
        assert_eq!(
            err.to_string(),
            "Invalid range_threshold config: limite is required"
        );
        assert_eq!(err.kind(), "invalid_config");
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("Alert", "alert_1");
        assert_eq!(err.to_string(), "Alert not found: alert_1");
    }
}
