use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::domain::Trigger;
use crate::persistence::{RedisStoreConfig, StateKeys};
use crate::supervisor::{BackoffPolicy, EngineConfig, RestartPolicy};
use crate::watcher::{DEFAULT_JOURNALCTL, DEFAULT_PROMETHEUS_URL};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub log_source: LogSourceConfig,
    /// Commands run for each action key (trigger key, `ibd_entered`, `ibd_exited`)
    #[serde(default)]
    pub actions: HashMap<String, ActionCommandConfig>,
    /// Watchers to start; the built-in fleet is used when empty
    #[serde(default)]
    pub watchers: Vec<WatcherSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    /// Prometheus server, e.g. `http://localhost:9090`
    #[serde(default = "default_prometheus_url")]
    pub url: String,
    /// Per-query timeout
    #[serde(default = "default_query_timeout")]
    pub timeout_secs: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: default_prometheus_url(),
            timeout_secs: default_query_timeout(),
        }
    }
}

fn default_prometheus_url() -> String {
    DEFAULT_PROMETHEUS_URL.to_string()
}

fn default_query_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection address
    #[serde(default = "default_redis_addr")]
    pub addr: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Redis database number
    #[serde(default)]
    pub db: i64,
    /// Prefix for every persisted key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            password: None,
            db: 0,
            key_prefix: default_key_prefix(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_redis_addr() -> String {
    "localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "bbbsupervisor".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Minimum time between two actions for the same trigger
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Per-trigger overrides, keyed by trigger key (e.g. `electrs_fully_synced`)
    #[serde(default)]
    pub trigger_cooldown_secs: HashMap<String, u64>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            trigger_cooldown_secs: HashMap::new(),
        }
    }
}

fn default_cooldown() -> u64 {
    300
}

/// What the registry does when a watcher stops on its own
#[derive(Debug, Clone, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_first_delay")]
    pub first_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Give up after this many consecutive restarts (unlimited when unset)
    #[serde(default)]
    pub max_restarts: Option<u32>,
    /// A watcher that stayed up this long has its restart counter reset
    #[serde(default = "default_reset_after")]
    pub reset_after_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            first_delay_ms: default_first_delay(),
            max_delay_secs: default_max_delay(),
            factor: default_factor(),
            max_restarts: None,
            reset_after_secs: default_reset_after(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_first_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    60
}

fn default_factor() -> f64 {
    2.0
}

fn default_reset_after() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSourceConfig {
    /// journalctl binary
    #[serde(default = "default_journalctl")]
    pub program: String,
}

impl Default for LogSourceConfig {
    fn default() -> Self {
        Self {
            program: default_journalctl(),
        }
    }
}

fn default_journalctl() -> String {
    DEFAULT_JOURNALCTL.to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ActionCommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_action_timeout")]
    pub timeout_secs: u64,
}

fn default_action_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherKind {
    Log,
    Prometheus,
}

/// One entry of the `watchers` list
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WatcherSpec {
    pub kind: WatcherKind,
    /// systemd unit the watcher belongs to
    pub unit: String,
    /// PromQL expression (prometheus only)
    #[serde(default)]
    pub expression: Option<String>,
    /// Trigger key or name (prometheus only)
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl WatcherSpec {
    pub fn log(unit: &str) -> Self {
        Self {
            kind: WatcherKind::Log,
            unit: unit.to_string(),
            expression: None,
            trigger: None,
            interval_secs: None,
        }
    }

    pub fn prometheus(unit: &str, expression: &str, trigger: Trigger, interval_secs: u64) -> Self {
        Self {
            kind: WatcherKind::Prometheus,
            unit: unit.to_string(),
            expression: Some(expression.to_string()),
            trigger: Some(trigger.key().to_string()),
            interval_secs: Some(interval_secs),
        }
    }
}

/// Watchers started when the configuration names none
pub fn default_watchers() -> Vec<WatcherSpec> {
    vec![
        WatcherSpec::log("bitcoind"),
        WatcherSpec::log("lightningd"),
        WatcherSpec::log("electrs"),
        WatcherSpec::log("bbbmiddleware"),
        WatcherSpec::prometheus("bitcoind", "bitcoin_ibd", Trigger::PrometheusBitcoindIbd, 10),
    ]
}

impl AppConfig {
    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("engine.cooldown_secs", default_cooldown())?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SUPERVISOR_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SUPERVISOR_REDIS__ADDR, etc.)
            .add_source(
                Environment::with_prefix("SUPERVISOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configured watchers, or the built-in fleet
    pub fn watcher_specs(&self) -> Vec<WatcherSpec> {
        if self.watchers.is_empty() {
            default_watchers()
        } else {
            self.watchers.clone()
        }
    }

    pub fn state_keys(&self) -> StateKeys {
        StateKeys::new(&self.redis.key_prefix)
    }

    pub fn redis_store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            addr: self.redis.addr.clone(),
            password: self.redis.password.clone(),
            db: self.redis.db,
            connect_timeout: Duration::from_secs(self.redis.connect_timeout_secs),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.prometheus.timeout_secs)
    }

    /// Decision engine settings; unknown trigger keys are skipped (see `validate`)
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::new(Duration::from_secs(self.engine.cooldown_secs));
        for (key, secs) in &self.engine.trigger_cooldown_secs {
            if let Ok(trigger) = key.parse::<Trigger>() {
                engine = engine.with_trigger_cooldown(trigger, Duration::from_secs(*secs));
            }
        }
        engine
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        if !self.restart.enabled {
            return RestartPolicy::Never;
        }
        RestartPolicy::Backoff {
            backoff: BackoffPolicy {
                first: Duration::from_millis(self.restart.first_delay_ms),
                max: Duration::from_secs(self.restart.max_delay_secs),
                factor: self.restart.factor,
            },
            max_restarts: self.restart.max_restarts,
            reset_after: Duration::from_secs(self.restart.reset_after_secs),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.prometheus.timeout_secs == 0 {
            errors.push("prometheus.timeout_secs must be positive".to_string());
        }

        for key in self.engine.trigger_cooldown_secs.keys() {
            if key.parse::<Trigger>().is_err() {
                errors.push(format!("engine.trigger_cooldown_secs: unknown trigger '{}'", key));
            }
        }

        if self.restart.enabled {
            if !(self.restart.factor.is_finite() && self.restart.factor >= 1.0) {
                errors.push("restart.factor must be a finite number >= 1.0".to_string());
            }
            if self.restart.max_delay_secs == 0 {
                errors.push("restart.max_delay_secs must be positive".to_string());
            }
        }

        for (key, action) in &self.actions {
            if action.program.trim().is_empty() {
                errors.push(format!("actions.{}: program must not be empty", key));
            }
            if action.timeout_secs == 0 {
                errors.push(format!("actions.{}: timeout_secs must be positive", key));
            }
        }

        for (i, spec) in self.watchers.iter().enumerate() {
            if spec.unit.trim().is_empty() {
                errors.push(format!("watchers[{}]: unit must not be empty", i));
            }
            if spec.kind == WatcherKind::Prometheus {
                if spec.expression.as_deref().map_or(true, |e| e.trim().is_empty()) {
                    errors.push(format!("watchers[{}]: prometheus watcher needs an expression", i));
                }
                match spec.trigger.as_deref() {
                    None => errors.push(format!("watchers[{}]: prometheus watcher needs a trigger", i)),
                    Some(raw) => {
                        if let Err(e) = raw.parse::<Trigger>() {
                            errors.push(format!("watchers[{}]: {}", i, e));
                        }
                    }
                }
                if spec.interval_secs == Some(0) {
                    errors.push(format!("watchers[{}]: interval_secs must be positive", i));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
