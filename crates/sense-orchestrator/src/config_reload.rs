// src/config_reload.rs

//! Reacts to `config:changed` notifications. Grounded on
//! `original_source/services/orchestrator/orchestrator/main.py`'s
//! `_config_change_listener`: a `schedule` change hot-reloads the
//! scheduler, `auth`/`camera` changes are logged as requiring a restart
//! (out of scope to act on automatically), anything else is a debug-level
//! no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sense_broker::Broker;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::runner::Runner;
use crate::schedule::Scheduler;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

pub async fn run(
    broker: Arc<dyn Broker>,
    scheduler: Arc<Scheduler>,
    runner: Arc<dyn Runner>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("config change listener started");
    loop {
        let mut sub = match broker.subscribe_config_changes().await {
            Ok(sub) => sub,
            Err(err) => {
                warn!(error = %err, "config:changed subscription failed, retrying");
                if sleep_or_shutdown(&mut shutdown_rx).await {
                    return;
                }
                continue;
            }
        };

        loop {
            tokio::select! {
                received = sub.recv() => {
                    match received {
                        Some(event) => handle(&broker, &scheduler, &runner, &event.section).await,
                        None => {
                            warn!("config:changed subscription closed, resubscribing");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("config change listener shutting down");
                    return;
                }
            }
        }

        if sleep_or_shutdown(&mut shutdown_rx).await {
            return;
        }
    }
}

async fn handle(broker: &Arc<dyn Broker>, scheduler: &Arc<Scheduler>, runner: &Arc<dyn Runner>, section: &str) {
    match section {
        "schedule" => {
            if let Ok(Some(config)) = broker.read_config("schedule").await {
                let updates: HashMap<String, i64> = config
                    .into_iter()
                    .filter_map(|(k, v)| v.as_i64().map(|n| (k, n)))
                    .collect();
                scheduler.update_schedule(updates).await;
                info!("schedule updated from config change");
            }
        }
        "auth" => {
            warn!("auth config changed, web-gateway restart may be required");
        }
        "camera" => {
            if runner.running().await.contains("source-camera") {
                warn!("camera config changed, restart stream to apply");
            }
        }
        other => {
            debug!(section = other, "config changed, no action needed");
        }
    }
}

async fn sleep_or_shutdown(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => false,
        _ = shutdown_rx.recv() => true,
    }
}
