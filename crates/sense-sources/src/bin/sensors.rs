// src/bin/sensors.rs

//! The persistent `sensors` worker: Sense HAT sensor polling plus the
//! `cmd:sensors` command surface and `display`/`sleep` config hot-reload.
//! Grounded on
//! `original_source/services/source-sensehat/sensehat/main.py`'s boot
//! sequence (LED rendering and the sleep-controlled display cycle itself
//! are out of spec.md §1's scope and are not reproduced here).

use std::sync::Arc;
use std::time::Duration;

use sense_broker::{Broker, connect_with_backoff};
use sense_sources::{DisplayState, SenseHatSource};
use sense_worker::{AppContext, CommandHandler, ConfigChangeListener, Source, persistent};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

const SOURCE_ID: &str = "sensors";
const POLL_INTERVAL: Duration = Duration::from_secs(30);
const CONNECT_ATTEMPTS: u32 = 3;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let broker = connect_with_backoff(&redis_url(), CONNECT_ATTEMPTS).await?;
    let broker: Arc<dyn Broker> = Arc::new(broker);

    let display_cfg = broker.read_config("display").await?.unwrap_or_default();
    let rotation = display_cfg.get("rotation").and_then(|v| v.as_i64()).unwrap_or(0);
    let scroll_speed = display_cfg
        .get("scroll_speed")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.08);
    let icon_duration = display_cfg
        .get("icon_duration")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.5);

    let ctx = AppContext::new(broker.clone(), SOURCE_ID);
    let source: Arc<dyn Source> = Arc::new(SenseHatSource::new());
    ctx.broker.write_meta(&ctx.source_id, &source.metadata()).await?;

    let display = DisplayState::new(broker, rotation, scroll_speed, icon_duration);
    let handler: Arc<dyn CommandHandler> = Arc::new(display.clone());
    let config_listener: Arc<dyn ConfigChangeListener> = Arc::new(display);

    let mut tasks = JoinSet::new();
    persistent::spawn(&mut tasks, ctx.clone(), source, handler, config_listener, POLL_INTERVAL);

    wait_for_os_signal().await;
    tracing::info!("shutdown signal received");
    ctx.shutdown();
    while tasks.join_next().await.is_some() {}
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
