//! Watcher Registry
//!
//! Starts one task per configured watcher. A watcher that stops while the
//! process is still running is restarted with exponential backoff; every
//! restart is reported on the error channel and recorded in the health table.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use crate::channel::ObservationSender;
use crate::config::{AppConfig, WatcherKind};
use crate::domain::Trigger;
use crate::error::{Result, SupervisorError};
use crate::watcher::{LogWatcher, PrometheusWatcher, Watcher};

/// Error source used for registry reports
pub const REGISTRY_SOURCE: &str = "registry";

/// Poll interval for Prometheus watchers that do not set one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// What to do when a watcher returns on its own
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestartPolicy {
    /// Leave it stopped (report only)
    Never,
    /// Restart after `backoff.next(n)` for the n-th consecutive restart
    Backoff {
        backoff: BackoffPolicy,
        /// Give up after this many consecutive restarts
        max_restarts: Option<u32>,
        /// Uptime after which the consecutive counter starts over
        reset_after: Duration,
    },
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Backoff {
            backoff: BackoffPolicy::default(),
            max_restarts: None,
            reset_after: Duration::from_secs(300),
        }
    }
}

/// Watcher task status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    /// Not started yet
    Pending,
    Running,
    /// Waiting for the backoff delay before the next start
    Restarting,
    /// Gave up after too many restarts
    Exhausted,
    /// Stopped by shutdown or by `RestartPolicy::Never`
    Stopped,
}

impl fmt::Display for WatcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherStatus::Pending => write!(f, "pending"),
            WatcherStatus::Running => write!(f, "running"),
            WatcherStatus::Restarting => write!(f, "restarting"),
            WatcherStatus::Exhausted => write!(f, "exhausted"),
            WatcherStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Health snapshot for one watcher
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherHealth {
    pub name: String,
    pub unit: String,
    pub status: WatcherStatus,
    /// Total restarts since boot
    pub restarts: u32,
    pub last_exit: Option<DateTime<Utc>>,
}

type HealthTable = Arc<RwLock<Vec<WatcherHealth>>>;

/// Fixed set of watchers plus their supervision
pub struct WatcherRegistry {
    watchers: Vec<Watcher>,
    restart: RestartPolicy,
    health: HealthTable,
}

impl WatcherRegistry {
    pub fn new(watchers: Vec<Watcher>, restart: RestartPolicy) -> Self {
        let health = watchers
            .iter()
            .map(|w| WatcherHealth {
                name: w.name(),
                unit: w.unit().to_string(),
                status: WatcherStatus::Pending,
                restarts: 0,
                last_exit: None,
            })
            .collect();

        Self {
            watchers,
            restart,
            health: Arc::new(RwLock::new(health)),
        }
    }

    /// Build the watchers named in the configuration (or the built-in fleet)
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut watchers = Vec::new();

        for spec in config.watcher_specs() {
            let watcher: Watcher = match spec.kind {
                WatcherKind::Log => LogWatcher::new(&spec.unit)
                    .with_program(&config.log_source.program)
                    .into(),
                WatcherKind::Prometheus => {
                    let expression = spec.expression.as_deref().ok_or_else(|| {
                        SupervisorError::Validation(format!(
                            "prometheus watcher for {} has no expression",
                            spec.unit
                        ))
                    })?;
                    let trigger = spec
                        .trigger
                        .as_deref()
                        .ok_or_else(|| {
                            SupervisorError::Validation(format!(
                                "prometheus watcher for {} has no trigger",
                                spec.unit
                            ))
                        })?
                        .parse::<Trigger>()
                        .map_err(SupervisorError::Validation)?;
                    let interval = spec
                        .interval_secs
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_POLL_INTERVAL);

                    PrometheusWatcher::with_timeout(
                        &spec.unit,
                        expression,
                        &config.prometheus.url,
                        trigger,
                        interval,
                        config.query_timeout(),
                    )?
                    .into()
                }
            };
            watchers.push(watcher);
        }

        Ok(Self::new(watchers, config.restart_policy()))
    }

    pub fn watchers(&self) -> &[Watcher] {
        &self.watchers
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Current health of every watcher
    pub async fn health(&self) -> Vec<WatcherHealth> {
        self.health.read().await.clone()
    }

    /// Spawn one task per watcher; all of them share `sink`.
    pub fn start(&self, sink: ObservationSender, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!("Starting {} watchers", self.watchers.len());

        self.watchers
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, watcher)| {
                tokio::spawn(supervise(
                    index,
                    watcher,
                    self.restart,
                    sink.clone(),
                    shutdown.clone(),
                    self.health.clone(),
                ))
            })
            .collect()
    }
}

async fn set_status(health: &HealthTable, index: usize, status: WatcherStatus) {
    if let Some(entry) = health.write().await.get_mut(index) {
        entry.status = status;
    }
}

/// Run one watcher, restarting it according to `restart` until shutdown.
async fn supervise(
    index: usize,
    watcher: Watcher,
    restart: RestartPolicy,
    sink: ObservationSender,
    shutdown: CancellationToken,
    health: HealthTable,
) {
    let name = watcher.name();
    let mut consecutive: u32 = 0;

    loop {
        set_status(&health, index, WatcherStatus::Running).await;
        let started = Instant::now();

        watcher.watch(&sink, &shutdown).await;

        if shutdown.is_cancelled() || sink.is_closed() {
            debug!(watcher = %name, "Watcher stopped");
            set_status(&health, index, WatcherStatus::Stopped).await;
            return;
        }

        let uptime = started.elapsed();
        if let Some(entry) = health.write().await.get_mut(index) {
            entry.last_exit = Some(Utc::now());
        }

        let (backoff, max_restarts, reset_after) = match restart {
            RestartPolicy::Never => {
                warn!(watcher = %name, "Watcher stopped and will not be restarted");
                set_status(&health, index, WatcherStatus::Stopped).await;
                sink.report(
                    REGISTRY_SOURCE,
                    format!("watcher {} stopped and will not be restarted", name),
                );
                return;
            }
            RestartPolicy::Backoff {
                backoff,
                max_restarts,
                reset_after,
            } => (backoff, max_restarts, reset_after),
        };

        if uptime >= reset_after {
            consecutive = 0;
        }

        if let Some(max) = max_restarts {
            if consecutive >= max {
                error!(watcher = %name, "Watcher exhausted {} restart attempts", max);
                set_status(&health, index, WatcherStatus::Exhausted).await;
                sink.report(
                    REGISTRY_SOURCE,
                    format!("watcher {} exhausted {} restart attempts, giving up", name, max),
                );
                return;
            }
        }

        let delay = backoff.next(consecutive);
        consecutive += 1;
        if let Some(entry) = health.write().await.get_mut(index) {
            entry.status = WatcherStatus::Restarting;
            entry.restarts += 1;
        }
        warn!(watcher = %name, "Watcher stopped after {:?}, restart #{} in {:?}", uptime, consecutive, delay);
        sink.report(
            REGISTRY_SOURCE,
            format!("watcher {} stopped, restart #{} in {:?}", name, consecutive, delay),
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                set_status(&health, index, WatcherStatus::Stopped).await;
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
