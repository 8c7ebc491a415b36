//! Event producers
//!
//! The set of watcher kinds is fixed:
//! - `LogWatcher` follows a systemd unit's journal
//! - `PrometheusWatcher` polls a PromQL expression

pub mod log;
pub mod prometheus;

pub use self::log::{parse_line, LogWatcher, DEFAULT_JOURNALCTL};
pub use self::prometheus::{
    parse_query_response, PrometheusWatcher, DEFAULT_PROMETHEUS_URL, DEFAULT_QUERY_TIMEOUT,
};

use tokio_util::sync::CancellationToken;

use crate::channel::ObservationSender;

/// A configured event producer
#[derive(Debug, Clone)]
pub enum Watcher {
    Log(LogWatcher),
    Prometheus(PrometheusWatcher),
}

impl Watcher {
    pub fn unit(&self) -> &str {
        match self {
            Watcher::Log(w) => w.unit(),
            Watcher::Prometheus(w) => w.unit(),
        }
    }

    /// Unique name, also the error source for this watcher
    pub fn name(&self) -> String {
        match self {
            Watcher::Log(w) => w.source(),
            Watcher::Prometheus(w) => w.source(),
        }
    }

    /// Produce events until the watcher gives up or `shutdown` fires.
    ///
    /// Log watchers return when their stream ends; Prometheus watchers only
    /// return on shutdown or when the engine is gone.
    pub async fn watch(&self, sink: &ObservationSender, shutdown: &CancellationToken) {
        match self {
            Watcher::Log(w) => w.watch(sink, shutdown).await,
            Watcher::Prometheus(w) => w.watch(sink, shutdown).await,
        }
    }
}

impl From<LogWatcher> for Watcher {
    fn from(w: LogWatcher) -> Self {
        Watcher::Log(w)
    }
}

impl From<PrometheusWatcher> for Watcher {
    fn from(w: PrometheusWatcher) -> Self {
        Watcher::Prometheus(w)
    }
}
