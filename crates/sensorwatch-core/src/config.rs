//! Configuration management for SensorWatch
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SENSORWATCH__<SECTION>__<KEY>` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file looked up when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "sensorwatch.toml";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Measurement database configuration
    pub database: DatabaseConfig,

    /// Alert definition store configuration
    pub store: StoreConfig,

    /// Alert evaluation configuration
    pub alerting: AlertingConfig,

    /// Notification configuration
    pub notification: NotificationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let settings = config::Config::builder()
            .add_source(config::File::from(file).required(required))
            .add_source(
                config::Environment::with_prefix("SENSORWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("notification.default_recipients")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.alerting.window_hours == 0 {
            return Err(Error::config("alerting.window_hours must be at least 1"));
        }
        if self.alerting.device_concurrency == 0 {
            return Err(Error::config("alerting.device_concurrency must be at least 1"));
        }
        if self.store.alerts_file.as_os_str().is_empty() {
            return Err(Error::config("store.alerts_file must not be empty"));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP API port
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Measurement database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Schema holding the sensor tables
    pub schema: String,
    /// Maximum connections
    pub max_connections: u32,
    /// Minimum connections
    pub min_connections: u32,
    /// How long to wait for a pooled connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "mysql://root@localhost:3306/sensores_dev".to_string(),
            schema: "sensores_dev".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Alert definition store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding the alert definitions
    pub alerts_file: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            alerts_file: PathBuf::from("json/alerts.json"),
        }
    }
}

/// Alert evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Length of the trailing evaluation window
    pub window_hours: u32,
    /// Upper bound for a single alert evaluation
    #[serde(with = "humantime_serde")]
    pub run_timeout: Duration,
    /// Upper bound for a single measurement query
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    /// Devices inspected concurrently within one evaluation
    pub device_concurrency: usize,
}

impl AlertingConfig {
    /// Length of the trailing evaluation window
    pub fn window_length(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window_hours))
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            run_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(30),
            device_concurrency: 4,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Send mail; when false notifications are only logged
    pub enabled: bool,
    /// SMTP relay host (STARTTLS)
    pub smtp_host: String,
    /// SMTP port
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Sender address
    pub from_address: String,
    /// Recipients used when an alert names none
    pub default_recipients: Vec<String>,
    /// Upper bound for opening the session and for each send
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            from_address: "alerts@sensorwatch.local".to_string(),
            default_recipients: vec!["alerts@sensorwatch.local".to_string()],
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Directory for daily-rotated log files; stdout only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.alerting.window_hours, 24);
        assert_eq!(config.notification.smtp_port, 587);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
schema = "sensores_prod"

[alerting]
query_timeout = "5s"
device_concurrency = 2

[notification]
enabled = false
default_recipients = ["ops@example.com"]
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.database.schema, "sensores_prod");
        assert_eq!(config.alerting.query_timeout, Duration::from_secs(5));
        assert_eq!(config.alerting.device_concurrency, 2);
        assert_eq!(config.alerting.window_hours, 24);
        assert!(!config.notification.enabled);
        assert_eq!(config.notification.default_recipients, vec!["ops@example.com"]);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/sensorwatch.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = Config::default();
        config.alerting.window_hours = 0;
        assert!(config.validate().is_err());
    }
}
