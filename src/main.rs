use bbbsupervisor::channel::observation_channel;
use bbbsupervisor::cli::Cli;
use bbbsupervisor::config::{AppConfig, LoggingConfig};
use bbbsupervisor::domain::SupervisorState;
use bbbsupervisor::error::{Result, SupervisorError};
use bbbsupervisor::persistence::{MemoryStore, RedisStore, StateStore};
use bbbsupervisor::supervisor::{CommandExecutor, DecisionEngine, WatcherRegistry};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long watcher tasks get to wind down after the engine stopped
const WATCHER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    cli.apply(&mut config);
    if let Err(errors) = config.validate() {
        return Err(SupervisorError::Validation(errors.join("; ")));
    }

    init_logging(&config.logging);
    info!("bbbsupervisor {} starting", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn StateStore> = match RedisStore::connect(&config.redis_store_config()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                "Could not connect to redis at {}: {}. Running without persistence",
                config.redis.addr, e
            );
            Arc::new(MemoryStore::new())
        }
    };

    let keys = config.state_keys();
    let state = SupervisorState::restore(store.as_ref(), &keys).await;

    let registry = WatcherRegistry::from_config(&config)?;
    let executor = Arc::new(CommandExecutor::from_config(&config.actions));
    let mut engine = DecisionEngine::new(config.engine_config(), state, store, keys, executor);

    let shutdown = CancellationToken::new();
    let (sink, observations) = observation_channel();
    let handles = registry.start(sink, shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    engine.run(observations, shutdown.clone()).await;
    shutdown.cancel();

    let stopped = tokio::time::timeout(WATCHER_STOP_TIMEOUT, async {
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Watcher task ended abnormally: {}", e);
            }
        }
    })
    .await;
    if stopped.is_err() {
        warn!("Watchers did not stop within {:?}", WATCHER_STOP_TIMEOUT);
    }

    for health in registry.health().await {
        info!(
            watcher = %health.name,
            status = %health.status,
            restarts = health.restarts,
            "Final watcher state"
        );
    }

    info!("bbbsupervisor stopped");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},bbbsupervisor={}", logging.level, logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
