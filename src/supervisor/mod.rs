//! Supervisor Layer
//!
//! This module turns observations into decisions:
//! - Watcher registry that starts and restarts the producers
//! - Decision engine with cooldown and regime edge detection
//! - Playbook of actions and the executor that runs them

pub mod backoff;
pub mod engine;
pub mod playbook;
pub mod registry;

pub use backoff::BackoffPolicy;
pub use engine::{Decision, DecisionEngine, EngineConfig, EngineStats};
pub use playbook::{Action, ActionCommand, ActionExecutor, ActionKind, CommandExecutor};
pub use registry::{
    RestartPolicy, WatcherHealth, WatcherRegistry, WatcherStatus, DEFAULT_POLL_INTERVAL,
    REGISTRY_SOURCE,
};
