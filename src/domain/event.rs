use std::fmt;

use super::Trigger;

/// Value carried by events derived from log lines
pub const LOG_EVENT_VALUE: f64 = 0.0;

/// Something a watcher observed about a unit
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEvent {
    /// systemd unit the observation belongs to, e.g. `bitcoind`
    pub unit: String,
    pub trigger: Trigger,
    /// What was measured: the matched log phrase or the PromQL expression
    pub measure: String,
    pub value: f64,
}

impl ObservedEvent {
    pub fn new(unit: &str, trigger: Trigger, measure: &str, value: f64) -> Self {
        Self {
            unit: unit.to_string(),
            trigger,
            measure: measure.to_string(),
            value,
        }
    }

    pub fn from_log(unit: &str, trigger: Trigger, phrase: &str) -> Self {
        Self::new(unit, trigger, phrase, LOG_EVENT_VALUE)
    }
}

impl fmt::Display for ObservedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({} = {})",
            self.trigger, self.unit, self.measure, self.value
        )
    }
}

/// Non-fatal failure reported by a producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedError {
    /// Producer that reported the failure, e.g. `log:electrs`
    pub source: String,
    pub detail: String,
}

impl ObservedError {
    pub fn new(source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            detail: detail.into(),
        }
    }

    pub fn from_error(source: impl Into<String>, err: &dyn std::error::Error) -> Self {
        Self::new(source, err.to_string())
    }
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source, self.detail)
    }
}
