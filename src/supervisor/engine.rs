//! Decision Engine
//!
//! Single consumer of the observation channels. Turns events into at most one
//! action per cooldown window (flood mitigation) and fires regime actions only
//! when the IBD indicator switches. Debounce state is persisted after every
//! change so it survives restarts.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::playbook::{Action, ActionExecutor, ActionKind};
use crate::channel::{Observation, ObservationReceiver};
use crate::domain::{ObservedError, ObservedEvent, Regime, SupervisorState, Trigger};
use crate::persistence::{StateKeys, StateStore};

/// Configuration for the decision engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Minimum time between two actions of the same trigger (default: 300s)
    pub cooldown: Duration,
    /// Per-trigger cooldown overrides
    pub trigger_cooldowns: HashMap<Trigger, Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl EngineConfig {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            trigger_cooldowns: HashMap::new(),
        }
    }

    pub fn with_trigger_cooldown(mut self, trigger: Trigger, cooldown: Duration) -> Self {
        self.trigger_cooldowns.insert(trigger, cooldown);
        self
    }

    pub fn cooldown_for(&self, trigger: Trigger) -> Duration {
        self.trigger_cooldowns
            .get(&trigger)
            .copied()
            .unwrap_or(self.cooldown)
    }
}

/// Counters kept by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub events: u64,
    pub errors: u64,
    pub actions_fired: u64,
    pub suppressed: u64,
    pub action_failures: u64,
    pub persist_failures: u64,
    /// IBD samples that were negative or not finite
    pub rejected: u64,
}

/// Outcome of handling one event
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// An action ran successfully
    Fired(ActionKind),
    /// Within the cooldown window of the last action for this trigger
    Suppressed { remaining: Duration },
    /// Regime unchanged, nothing to do
    NoTransition,
    /// The action failed; debounce state left untouched so the next event retries
    ActionFailed,
    /// Sample outside the indicator's range, state left untouched
    Rejected,
}

/// Event loop owning the supervisor state
pub struct DecisionEngine {
    config: EngineConfig,
    state: SupervisorState,
    store: Arc<dyn StateStore>,
    keys: StateKeys,
    executor: Arc<dyn ActionExecutor>,
    stats: EngineStats,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        state: SupervisorState,
        store: Arc<dyn StateStore>,
        keys: StateKeys,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            config,
            state,
            store,
            keys,
            executor,
            stats: EngineStats::default(),
        }
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Consume observations until shutdown or until every producer is gone,
    /// then drain whatever is still queued.
    pub async fn run(&mut self, mut observations: ObservationReceiver, shutdown: CancellationToken) {
        info!(
            "Decision engine started (store: {}, cooldown: {:?})",
            self.store.backend(),
            self.config.cooldown
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Decision engine received shutdown");
                    break;
                }
                next = observations.recv() => next,
            };

            match next {
                Some(observation) => self.dispatch(observation).await,
                None => {
                    warn!("All watchers are gone, decision engine stopping");
                    break;
                }
            }
        }

        let mut drained = 0usize;
        while let Some(observation) = observations.try_recv() {
            self.dispatch(observation).await;
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {} queued observations", drained);
        }

        info!(
            events = self.stats.events,
            errors = self.stats.errors,
            fired = self.stats.actions_fired,
            suppressed = self.stats.suppressed,
            action_failures = self.stats.action_failures,
            persist_failures = self.stats.persist_failures,
            rejected = self.stats.rejected,
            "Decision engine stopped"
        );
    }

    async fn dispatch(&mut self, observation: Observation) {
        match observation {
            Observation::Event(event) => {
                self.handle_event(event).await;
            }
            Observation::Error(err) => self.handle_error(&err),
        }
    }

    /// Errors are logged and counted; they never touch the supervisor state.
    pub fn handle_error(&mut self, err: &ObservedError) {
        self.stats.errors += 1;
        warn!(source = %err.source, "Watcher error: {}", err.detail);
    }

    pub async fn handle_event(&mut self, event: ObservedEvent) -> Decision {
        self.handle_event_at(event, Utc::now()).await
    }

    /// Handle an event as if it arrived at `now`
    pub async fn handle_event_at(&mut self, event: ObservedEvent, now: DateTime<Utc>) -> Decision {
        self.stats.events += 1;
        debug!(
            unit = %event.unit,
            trigger = %event.trigger,
            measure = %event.measure,
            value = event.value,
            "Received event"
        );

        match event.trigger {
            Trigger::PrometheusBitcoindIbd => self.handle_regime(event).await,
            Trigger::ElectrsFullySynced
            | Trigger::ElectrsNoBitcoindConnectivity
            | Trigger::MiddlewareNoBitcoindConnectivity => self.handle_cooldown(event, now).await,
        }
    }

    async fn handle_cooldown(&mut self, event: ObservedEvent, now: DateTime<Utc>) -> Decision {
        let trigger = event.trigger;
        let cooldown = self.config.cooldown_for(trigger);

        if let Some(last) = self.state.last_fired.get(&trigger) {
            match now.signed_duration_since(*last).to_std() {
                Ok(elapsed) if elapsed < cooldown => {
                    self.stats.suppressed += 1;
                    let remaining = cooldown - elapsed;
                    info!(
                        trigger = %trigger,
                        unit = %event.unit,
                        "Suppressing trigger, fired {:?} ago (cooldown {:?})",
                        elapsed,
                        cooldown
                    );
                    return Decision::Suppressed { remaining };
                }
                Ok(_) => {}
                // last_fired lies in the future, the clock was stepped back
                Err(_) => warn!(
                    trigger = %trigger,
                    "Last firing at {} is in the future, ignoring cooldown",
                    last
                ),
            }
        }

        let action = Action::fire(event);
        if let Err(e) = self.executor.execute(&action).await {
            self.stats.action_failures += 1;
            error!(trigger = %trigger, "Action {} failed: {}", action.key(), e);
            return Decision::ActionFailed;
        }

        self.stats.actions_fired += 1;
        info!(trigger = %trigger, unit = %action.event.unit, "Trigger fired");
        self.state.last_fired.insert(trigger, now);
        let key = self.keys.last_fired(trigger);
        self.persist(&key, &now.timestamp_millis().to_string()).await;

        Decision::Fired(ActionKind::Fire)
    }

    async fn handle_regime(&mut self, event: ObservedEvent) -> Decision {
        let value = event.value;
        // negative values are reserved for the unknown sentinel in persisted state
        if !value.is_finite() || value < 0.0 {
            self.stats.rejected += 1;
            warn!(unit = %event.unit, measure = %event.measure, "Ignoring IBD sample {}", value);
            return Decision::Rejected;
        }

        let previous = self.state.ibd_regime();
        let current = Regime::from_value(value);

        let decision = match ActionKind::for_regime(current) {
            Some(kind) if current != previous => {
                let action = Action::regime(kind, event);
                if let Err(e) = self.executor.execute(&action).await {
                    self.stats.action_failures += 1;
                    error!(
                        "Regime switch {} -> {} not handled, action {} failed: {}",
                        previous,
                        current,
                        action.key(),
                        e
                    );
                    return Decision::ActionFailed;
                }
                self.stats.actions_fired += 1;
                info!("bitcoind regime switched {} -> {}", previous, current);
                Decision::Fired(kind)
            }
            _ => Decision::NoTransition,
        };

        // Updated on every poll so the comparison stays accurate across restarts
        self.state.last_ibd_value = value;
        let key = self.keys.last_ibd_value();
        self.persist(&key, &value.to_string()).await;

        decision
    }

    /// Best effort: a failed write is logged, the in-memory state stays authoritative.
    async fn persist(&mut self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value).await {
            self.stats.persist_failures += 1;
            warn!(key = %key, "Failed to persist supervisor state to {}: {}", self.store.backend(), e);
        }
    }
}
