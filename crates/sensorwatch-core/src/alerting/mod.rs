//! Alert validation engine for SensorWatch
//!
//! Evaluates stored alert definitions against recent measurements, notifies
//! recipients about flagged devices and records each attempt.

mod evaluator;
mod notifier;
mod repository;
pub mod rules;
mod window;

pub use evaluator::AlertEvaluator;
pub use notifier::{LogMailer, MailTransport, NotificationDispatcher, SmtpMailer};
pub use repository::{AlertStore, JsonFileAlertStore};
pub use rules::Rule;
pub use window::{Clock, FixedClock, SystemClock, WindowPolicy};
