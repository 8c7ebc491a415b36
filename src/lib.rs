pub mod channel;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod supervisor;
pub mod watcher;

pub use channel::{observation_channel, Observation, ObservationReceiver, ObservationSender};
pub use config::AppConfig;
pub use domain::{ObservedError, ObservedEvent, Regime, SupervisorState, Trigger, IBD_UNKNOWN};
pub use error::{Result, SupervisorError};
pub use persistence::{MemoryStore, RedisStore, StateKeys, StateStore};
pub use supervisor::{
    Action, ActionExecutor, ActionKind, CommandExecutor, Decision, DecisionEngine, EngineConfig,
    RestartPolicy, WatcherHealth, WatcherRegistry, WatcherStatus,
};
pub use watcher::{LogWatcher, PrometheusWatcher, Watcher};
