//! SensorWatch CLI
//!
//! Command-line interface for the SensorWatch alert validation engine.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sensorwatch::alerting::{AlertEvaluator, AlertStore, JsonFileAlertStore, NotificationDispatcher};
use sensorwatch::api::{AppState, HttpServer};
use sensorwatch::config::LoggingConfig;
use sensorwatch::db::{MeasurementSource, MySqlMeasurementStore};
use sensorwatch::models::{BatchReport, ValidationResult};
use sensorwatch::Config;

/// SensorWatch - Alert validation for sensor data
#[derive(Parser)]
#[command(name = "sensorwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "SENSORWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// HTTP API port (overrides server.http_port)
        #[arg(long, env = "SENSORWATCH_HTTP_PORT")]
        http_port: Option<u16>,
    },

    /// Manage and run alert definitions
    Alerts {
        #[command(subcommand)]
        command: AlertsCommands,
    },

    /// Measurement database utilities
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum AlertsCommands {
    /// List stored alert definitions
    List {
        /// Only alerts of this project
        #[arg(long)]
        project: Option<String>,
    },

    /// Evaluate one alert
    Validate {
        /// Alert ID to evaluate
        alert_id: String,
    },

    /// Evaluate every active alert
    ValidateAll,

    /// Evaluate the active alerts of one project
    ValidateProject {
        /// Project ID
        project_id: String,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Check connectivity to the measurement database
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Error reading .env file: {e}");
            return ExitCode::FAILURE;
        }
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _guard = init_tracing(&config.logging, cli.verbose);

    // Execute command
    let result = match cli.command {
        Commands::Serve { http_port } => run_serve(config, http_port).await,
        Commands::Alerts { command } => run_alerts(config, command, cli.format).await,
        Commands::Db { command } => run_db(config, command, cli.format).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Install the global subscriber; the guard must outlive the program
fn init_tracing(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sensorwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    guard
}

fn open_store(config: &Config) -> Arc<JsonFileAlertStore> {
    Arc::new(JsonFileAlertStore::new(config.store.alerts_file.clone()))
}

async fn open_source(config: &Config) -> anyhow::Result<Arc<MySqlMeasurementStore>> {
    let source = MySqlMeasurementStore::new(&config.database)
        .await
        .context("connecting to the measurement database")?;
    Ok(Arc::new(source))
}

fn build_evaluator(
    config: &Config,
    store: Arc<JsonFileAlertStore>,
    source: Arc<MySqlMeasurementStore>,
) -> anyhow::Result<AlertEvaluator> {
    let notifier = NotificationDispatcher::from_config(&config.notification)
        .context("configuring the mail transport")?;
    Ok(AlertEvaluator::new(store, source, notifier, &config.alerting))
}

async fn run_serve(config: Config, http_port: Option<u16>) -> anyhow::Result<()> {
    let port = http_port.unwrap_or(config.server.http_port);
    let addr = format!("{}:{}", config.server.host, port);

    let store = open_store(&config);
    let source = open_source(&config).await?;
    let evaluator = build_evaluator(&config, store.clone(), source.clone())?;

    info!(
        alerts_file = %store.path().display(),
        window_hours = config.alerting.window_hours,
        "Starting SensorWatch API on {}",
        addr
    );

    let state = AppState {
        store,
        source,
        evaluator: Arc::new(evaluator),
    };
    HttpServer::new(state).serve(&addr).await?;

    Ok(())
}

async fn run_alerts(
    config: Config,
    command: AlertsCommands,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let store = open_store(&config);

    if let AlertsCommands::List { project } = &command {
        let alerts: Vec<_> = store
            .list()
            .await?
            .into_iter()
            .filter(|a| project.as_deref().map_or(true, |p| a.project_id == p))
            .collect();

        if let OutputFormat::Json = format {
            return print_json(&alerts);
        }
        println!("{} alert(s)", alerts.len());
        for alert in &alerts {
            println!(
                "  {:<40} project={:<6} kind={:<22} active={} parameter={}",
                alert.id,
                alert.project_id,
                alert.validation_kind,
                alert.active,
                alert.parameter.as_deref().unwrap_or("-"),
            );
        }
        return Ok(());
    }

    let source = open_source(&config).await?;
    let evaluator = build_evaluator(&config, store, source)?;

    match command {
        AlertsCommands::List { .. } => Ok(()),
        AlertsCommands::Validate { alert_id } => {
            let result = evaluator.run_one(&alert_id).await?;
            match format {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Text => print_result(&result),
            }
            if !result.is_success() {
                anyhow::bail!("alert {alert_id} could not be evaluated");
            }
            Ok(())
        }
        AlertsCommands::ValidateAll => {
            let report = evaluator.run_all_active().await?;
            print_batch(&report, format)
        }
        AlertsCommands::ValidateProject { project_id } => {
            let report = evaluator.run_by_project(&project_id).await?;
            print_batch(&report, format)
        }
    }
}

async fn run_db(config: Config, command: DbCommands, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        DbCommands::Health => {
            let source = open_source(&config).await?;
            source.health_check().await?;

            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "status": "ok",
                    "database": "reachable",
                }))?,
                OutputFormat::Text => println!("Database: reachable"),
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_result(result: &ValidationResult) {
    match result {
        ValidationResult::Success(report) => {
            println!(
                "{}: {} device(s) checked, {} with issues, {} violation(s), {} email(s) sent",
                report.alert_id,
                report.total_devices_checked,
                report.devices_with_issues,
                report.total_violations,
                report.email_notifications.total_emails_sent,
            );
            for issue in &report.issues_found {
                println!(
                    "  {} ({}): {} violation(s)",
                    issue.codigo_interno,
                    issue.device_id,
                    issue.detail.violation_count()
                );
            }
            for failure in &report.failed_devices {
                println!("  {} failed: {}", failure.codigo_interno, failure.message);
            }
        }
        ValidationResult::Error(failure) => {
            println!(
                "{}: error [{}] {}",
                failure.alert_id, failure.error_kind, failure.message
            );
        }
    }
}

fn print_batch(report: &BatchReport, format: OutputFormat) -> anyhow::Result<()> {
    if let OutputFormat::Json = format {
        return print_json(report);
    }

    if let Some(message) = &report.message {
        println!("{message}");
        return Ok(());
    }
    println!("{} alert(s) processed", report.total_alerts_processed);
    for outcome in &report.validation_results {
        print_result(&outcome.result);
    }
    Ok(())
}
