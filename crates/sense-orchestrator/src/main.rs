// src/main.rs

//! The orchestrator process entry point. Seeds config, builds the
//! schedule, and runs the scheduler, command dispatcher, lifecycle
//! listener, config-change listener, and health monitor concurrently
//! until a shutdown signal, mirroring
//! `original_source/services/orchestrator/orchestrator/main.py`'s `run()`.

use std::collections::HashMap;
use std::sync::Arc;

use sense_broker::{Broker, RedisBroker, connect_with_backoff};
use sense_orchestrator::{CommandDispatcher, ComposeRunner, HealthMonitor, LifecycleListener, Scheduler};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

const CONNECT_ATTEMPTS: u32 = 10;
const SHUTDOWN_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379".to_string())
}

fn env_project_name() -> String {
    std::env::var("COMPOSE_PROJECT_NAME").unwrap_or_else(|_| "sense-pulse".to_string())
}

fn env_schedule_defaults() -> HashMap<String, u64> {
    fn env_int(key: &str, default: u64) -> u64 {
        std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    }
    HashMap::from([
        ("source-tailscale".to_string(), env_int("SCHEDULE_TAILSCALE", 30)),
        ("source-pihole".to_string(), env_int("SCHEDULE_PIHOLE", 30)),
        ("source-system".to_string(), env_int("SCHEDULE_SYSTEM", 30)),
        ("source-aranet4".to_string(), env_int("SCHEDULE_ARANET4", 300)),
        ("source-weather".to_string(), env_int("SCHEDULE_WEATHER", 600)),
    ])
}

/// Merges the `config:schedule` section (if present) with env defaults for
/// any service the config doesn't mention.
async fn build_schedules(broker: &dyn Broker) -> HashMap<String, u64> {
    let mut schedules = HashMap::new();
    if let Ok(Some(config)) = broker.read_config("schedule").await {
        for (key, val) in config {
            if let Some(interval) = val.as_u64() {
                schedules.insert(sense_orchestrator::schedule::normalize_service_key(&key), interval);
            }
        }
    }
    for (service, interval) in env_schedule_defaults() {
        schedules.entry(service).or_insert(interval);
    }
    schedules
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("orchestrator starting");

    let broker: Arc<RedisBroker> = Arc::new(connect_with_backoff(&redis_url(), CONNECT_ATTEMPTS).await?);
    let broker: Arc<dyn Broker> = broker;

    let seeded = sense_orchestrator::config_seeder::seed_all_config(&*broker).await?;
    let seeded_sections: Vec<&str> = seeded
        .iter()
        .filter(|(_, &written)| written)
        .map(|(section, _)| section.as_str())
        .collect();
    if !seeded_sections.is_empty() {
        tracing::info!(sections = %seeded_sections.join(", "), "seeded config sections");
    }

    let schedules = build_schedules(&*broker).await;
    let project_name = env_project_name();
    let runner: Arc<dyn sense_orchestrator::Runner> = Arc::new(ComposeRunner::new(project_name));

    let scheduler = Arc::new(Scheduler::new(runner.clone(), schedules));
    let command_dispatcher = Arc::new(CommandDispatcher::new(broker.clone(), runner.clone()));
    let lifecycle_listener = Arc::new(LifecycleListener::new(broker.clone(), runner.clone()));
    let health_monitor = Arc::new(HealthMonitor::new(broker.clone()));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut tasks = JoinSet::new();
    tasks.spawn(scheduler.clone().run(shutdown_tx.subscribe()));
    tasks.spawn(command_dispatcher.run(shutdown_tx.subscribe()));
    tasks.spawn(lifecycle_listener.run(shutdown_tx.subscribe()));
    tasks.spawn(health_monitor.run(shutdown_tx.subscribe()));
    tasks.spawn(sense_orchestrator::config_reload::run(
        broker.clone(),
        scheduler.clone(),
        runner.clone(),
        shutdown_tx.subscribe(),
    ));

    tracing::info!("orchestrator started");
    wait_for_os_signal().await;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        tracing::warn!("orchestrator components did not shut down within the drain timeout");
    }

    tracing::info!("orchestrator stopped");
    Ok(())
}

async fn wait_for_os_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
