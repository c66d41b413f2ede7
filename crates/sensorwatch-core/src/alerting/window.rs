//! Time source and evaluation window

use chrono::{DateTime, Duration, Utc};

use crate::models::EvaluationWindow;

/// Source of "now" for evaluation runs
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Trailing window policy shared by all evaluators
#[derive(Debug, Clone, Copy)]
pub struct WindowPolicy {
    length: Duration,
}

impl WindowPolicy {
    pub fn new(length: Duration) -> Self {
        Self { length }
    }

    pub fn length(&self) -> Duration {
        self.length
    }

    /// `[now - length, now]`
    pub fn window_at(&self, now: DateTime<Utc>) -> EvaluationWindow {
        EvaluationWindow::trailing(now, self.length)
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}
