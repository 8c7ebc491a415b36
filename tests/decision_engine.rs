use async_trait::async_trait;
use bbbsupervisor::channel::observation_channel;
use bbbsupervisor::domain::{ObservedEvent, SupervisorState, Trigger, IBD_UNKNOWN};
use bbbsupervisor::error::{Result, SupervisorError};
use bbbsupervisor::persistence::{MemoryStore, StateKeys, StateStore};
use bbbsupervisor::supervisor::{Action, ActionExecutor, ActionKind, Decision, DecisionEngine, EngineConfig};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Records every action; can be switched to fail.
#[derive(Default)]
struct RecordingExecutor {
    actions: Mutex<Vec<Action>>,
    failing: AtomicBool,
}

impl RecordingExecutor {
    async fn kinds(&self) -> Vec<ActionKind> {
        self.actions.lock().await.iter().map(|a| a.kind).collect()
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &Action) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SupervisorError::ActionFailed {
                action: action.key().to_string(),
                reason: "script exited with 1".to_string(),
            });
        }
        self.actions.lock().await.push(action.clone());
        Ok(())
    }
}

/// Store whose writes always fail
struct BrokenStore;

#[async_trait]
impl StateStore for BrokenStore {
    fn backend(&self) -> &'static str {
        "broken"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(SupervisorError::Store("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(SupervisorError::Store("connection refused".to_string()))
    }
}

fn keys() -> StateKeys {
    StateKeys::new("test")
}

fn build(
    executor: Arc<RecordingExecutor>,
    store: Arc<dyn StateStore>,
    cooldown: Duration,
) -> DecisionEngine {
    DecisionEngine::new(
        EngineConfig::new(cooldown),
        SupervisorState::default(),
        store,
        keys(),
        executor,
    )
}

fn ibd(value: f64) -> ObservedEvent {
    ObservedEvent::new("bitcoind", Trigger::PrometheusBitcoindIbd, "bitcoin_ibd", value)
}

fn compaction() -> ObservedEvent {
    ObservedEvent::from_log("electrs", Trigger::ElectrsFullySynced, "finished full compaction")
}

/// Same-trigger events strictly inside the window fire at most once per window.
#[tokio::test]
async fn cooldown_fires_once_per_window() {
    let executor = Arc::new(RecordingExecutor::default());
    let mut engine = build(executor.clone(), Arc::new(MemoryStore::new()), Duration::from_secs(60));
    let t0 = Utc::now();

    let mut fired = 0;
    for offset in [0, 1, 10, 30, 59] {
        let decision = engine
            .handle_event_at(compaction(), t0 + ChronoDuration::seconds(offset))
            .await;
        if decision == Decision::Fired(ActionKind::Fire) {
            fired += 1;
        }
    }
    assert_eq!(fired, 1);

    // window over: fires again
    assert_eq!(
        engine
            .handle_event_at(compaction(), t0 + ChronoDuration::seconds(60))
            .await,
        Decision::Fired(ActionKind::Fire)
    );
    assert_eq!(executor.kinds().await.len(), 2);
    assert_eq!(engine.stats().suppressed, 4);
}

/// Cooldown is tracked per trigger.
#[tokio::test]
async fn cooldown_is_per_trigger() {
    let executor = Arc::new(RecordingExecutor::default());
    let mut engine = build(executor.clone(), Arc::new(MemoryStore::new()), Duration::from_secs(60));
    let now = Utc::now();

    engine.handle_event_at(compaction(), now).await;
    let other = ObservedEvent::from_log(
        "bbbmiddleware",
        Trigger::MiddlewareNoBitcoindConnectivity,
        "GetBlockChainInfo rpc call failed",
    );
    assert_eq!(
        engine.handle_event_at(other, now).await,
        Decision::Fired(ActionKind::Fire)
    );

    let triggers: Vec<Trigger> = executor.actions.lock().await.iter().map(|a| a.trigger).collect();
    assert_eq!(
        triggers,
        vec![Trigger::ElectrsFullySynced, Trigger::MiddlewareNoBitcoindConnectivity]
    );
}

/// Values [1,1,1,0,0,1] fire at indices 0 (from unknown), 3 and 5.
#[tokio::test]
async fn ibd_edges_fire_on_regime_change_only() {
    let executor = Arc::new(RecordingExecutor::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = build(executor.clone(), store.clone(), Duration::from_secs(60));

    let mut fired_at = Vec::new();
    for (i, value) in [1.0, 1.0, 1.0, 0.0, 0.0, 1.0].into_iter().enumerate() {
        if let Decision::Fired(_) = engine.handle_event(ibd(value)).await {
            fired_at.push(i);
        }
        // updated on every poll, transition or not
        assert_eq!(engine.state().last_ibd_value, value);
        assert_eq!(
            store.get(&keys().last_ibd_value()).await.unwrap(),
            Some(value.to_string())
        );
    }

    assert_eq!(fired_at, vec![0, 3, 5]);
    assert_eq!(
        executor.kinds().await,
        vec![ActionKind::EnteredIbd, ActionKind::ExitedIbd, ActionKind::EnteredIbd]
    );
}

/// The first IBD sample after an empty state is always a transition.
#[tokio::test]
async fn first_ibd_event_leaves_unknown_regime() {
    for value in [0.0, 1.0] {
        let executor = Arc::new(RecordingExecutor::default());
        let mut engine = build(executor.clone(), Arc::new(MemoryStore::new()), Duration::from_secs(60));
        assert_eq!(engine.state().last_ibd_value, IBD_UNKNOWN);

        let decision = engine.handle_event(ibd(value)).await;
        assert!(matches!(decision, Decision::Fired(_)), "value {value}: {decision:?}");
    }
}

/// Entered IBD, no change, exited IBD.
#[tokio::test]
async fn end_to_end_ibd_scenario() {
    let executor = Arc::new(RecordingExecutor::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = build(executor.clone(), store.clone(), Duration::from_secs(60));

    assert_eq!(
        engine.handle_event(ibd(1.0)).await,
        Decision::Fired(ActionKind::EnteredIbd)
    );
    assert_eq!(engine.handle_event(ibd(1.0)).await, Decision::NoTransition);
    assert_eq!(
        engine.handle_event(ibd(0.0)).await,
        Decision::Fired(ActionKind::ExitedIbd)
    );
    assert_eq!(
        store.get(&keys().last_ibd_value()).await.unwrap(),
        Some("0".to_string())
    );
}

/// A failed action leaves debounce state untouched so the next event retries.
#[tokio::test]
async fn failed_action_is_retried_on_next_event() {
    let executor = Arc::new(RecordingExecutor::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = build(executor.clone(), store.clone(), Duration::from_secs(60));
    let now = Utc::now();

    executor.set_failing(true);
    assert_eq!(engine.handle_event_at(compaction(), now).await, Decision::ActionFailed);
    assert_eq!(engine.handle_event(ibd(1.0)).await, Decision::ActionFailed);
    assert!(engine.state().last_fired.is_empty());
    assert_eq!(engine.state().last_ibd_value, IBD_UNKNOWN);
    assert!(store.is_empty().await);

    executor.set_failing(false);
    assert_eq!(
        engine
            .handle_event_at(compaction(), now + ChronoDuration::seconds(1))
            .await,
        Decision::Fired(ActionKind::Fire)
    );
    assert_eq!(
        engine.handle_event(ibd(1.0)).await,
        Decision::Fired(ActionKind::EnteredIbd)
    );
    assert_eq!(engine.stats().action_failures, 2);
}

/// Persistence failures are logged; the action is not rolled back.
#[tokio::test]
async fn persist_failure_keeps_in_memory_state() {
    let executor = Arc::new(RecordingExecutor::default());
    let mut engine = build(executor.clone(), Arc::new(BrokenStore), Duration::from_secs(60));
    let now = Utc::now();

    assert_eq!(
        engine.handle_event_at(compaction(), now).await,
        Decision::Fired(ActionKind::Fire)
    );
    assert!(engine.state().last_fired.contains_key(&Trigger::ElectrsFullySynced));
    assert_eq!(engine.stats().persist_failures, 1);

    // in-memory dedup still works
    assert!(matches!(
        engine
            .handle_event_at(compaction(), now + ChronoDuration::seconds(5))
            .await,
        Decision::Suppressed { .. }
    ));
}

/// State restored from the store keeps the cooldown across restarts.
#[tokio::test]
async fn restored_state_survives_restart() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();

    {
        let executor = Arc::new(RecordingExecutor::default());
        let mut engine = build(executor, store.clone(), Duration::from_secs(600));
        engine.handle_event_at(compaction(), now).await;
        engine.handle_event(ibd(1.0)).await;
    }

    let state = SupervisorState::restore(store.as_ref(), &keys()).await;
    assert_eq!(state.last_ibd_value, 1.0);

    let executor = Arc::new(RecordingExecutor::default());
    let mut engine = DecisionEngine::new(
        EngineConfig::new(Duration::from_secs(600)),
        state,
        store,
        keys(),
        executor.clone(),
    );
    assert!(matches!(
        engine
            .handle_event_at(compaction(), now + ChronoDuration::seconds(30))
            .await,
        Decision::Suppressed { .. }
    ));
    assert_eq!(engine.handle_event(ibd(1.0)).await, Decision::NoTransition);
    assert!(executor.actions.lock().await.is_empty());
}

/// A sub-second firing time must not shorten the window after a restart.
#[tokio::test]
async fn restored_cooldown_keeps_fractional_seconds() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc.timestamp_millis_opt(1_700_000_000_900).unwrap();

    {
        let mut engine = build(
            Arc::new(RecordingExecutor::default()),
            store.clone(),
            Duration::from_secs(60),
        );
        engine.handle_event_at(compaction(), t0).await;
    }

    let state = SupervisorState::restore(store.as_ref(), &keys()).await;
    assert_eq!(state.last_fired[&Trigger::ElectrsFullySynced], t0);

    let executor = Arc::new(RecordingExecutor::default());
    let mut engine = DecisionEngine::new(
        EngineConfig::new(Duration::from_secs(60)),
        state,
        store,
        keys(),
        executor.clone(),
    );
    assert!(matches!(
        engine
            .handle_event_at(compaction(), t0 + ChronoDuration::milliseconds(59_500))
            .await,
        Decision::Suppressed { .. }
    ));
    assert!(executor.actions.lock().await.is_empty());
}

/// A negative sample is not a regime and must not reset edge detection.
#[tokio::test]
async fn negative_ibd_sample_does_not_refire() {
    let executor = Arc::new(RecordingExecutor::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = build(executor.clone(), store.clone(), Duration::from_secs(60));

    let decisions = vec![
        engine.handle_event(ibd(1.0)).await,
        engine.handle_event(ibd(-1.0)).await,
        engine.handle_event(ibd(1.0)).await,
    ];

    assert_eq!(
        decisions,
        vec![
            Decision::Fired(ActionKind::EnteredIbd),
            Decision::Rejected,
            Decision::NoTransition,
        ]
    );
    assert_eq!(executor.kinds().await, vec![ActionKind::EnteredIbd]);
    assert_eq!(
        store.get(&keys().last_ibd_value()).await.unwrap(),
        Some("1".to_string())
    );
}

/// Errors never touch state and never stop the loop.
#[tokio::test]
async fn run_loop_isolates_errors_and_drains_on_shutdown() {
    let executor = Arc::new(RecordingExecutor::default());
    let mut engine = build(executor.clone(), Arc::new(MemoryStore::new()), Duration::from_secs(60));
    let (sink, observations) = observation_channel();
    let shutdown = CancellationToken::new();

    sink.report("log:electrs", "stderr: Failed to get journal");
    sink.event(ibd(1.0));
    sink.report("prometheus:bitcoin_ibd", "HTTP 503");
    sink.event(compaction());
    sink.event(ibd(0.0));

    // shutdown already requested: everything queued is still handled
    shutdown.cancel();
    engine.run(observations, shutdown).await;

    assert_eq!(engine.stats().errors, 2);
    assert_eq!(engine.stats().events, 3);
    assert_eq!(
        executor.kinds().await,
        vec![ActionKind::EnteredIbd, ActionKind::Fire, ActionKind::ExitedIbd]
    );
    assert_eq!(engine.state().last_ibd_value, 0.0);
}

/// The loop ends on its own once every producer is gone.
#[tokio::test]
async fn run_loop_stops_when_producers_are_gone() {
    let executor = Arc::new(RecordingExecutor::default());
    let mut engine = build(executor.clone(), Arc::new(MemoryStore::new()), Duration::from_secs(60));
    let (sink, observations) = observation_channel();

    let producer = tokio::spawn(async move {
        for value in [1.0, 1.0, 0.0] {
            sink.event(ibd(value));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        engine.run(observations, CancellationToken::new()),
    )
    .await
    .expect("engine should stop when all senders are dropped");
    producer.await.unwrap();

    assert_eq!(engine.stats().events, 3);
    assert_eq!(engine.stats().actions_fired, 2);
}
