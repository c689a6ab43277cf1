// src/main.rs

//! The network camera worker process. `MODE=stream` (default) runs the HLS
//! transcoder with command handling until a `stop` command or signal tears
//! it down; `MODE=discover` scans the local network for RTSP cameras once
//! and exits. Grounded on
//! `original_source/services/source-camera/camera/main.py`'s mode dispatch
//! and boot sequence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sense_broker::{Broker, RedisBroker, SourceStatus, connect_with_backoff, now_ts};
use sense_camera::discover;
use sense_camera::ptz::{NullPtzClient, PtzClient};
use sense_camera::{CameraCommandHandler, CameraConfig, CameraSource, HlsSettings, StreamManager, build_rtsp_url};
use sense_worker::{AppContext, CommandHandler, ConfigChangeListener, Source, persistent};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

const SOURCE_ID: &str = "network_camera";
const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const HEALTH_TICK_INTERVAL: Duration = Duration::from_secs(2);
const CONNECT_ATTEMPTS: u32 = 10;

struct NoopConfigListener;

#[async_trait]
impl ConfigChangeListener for NoopConfigListener {}

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

    let mode = std::env::var("MODE")
        .unwrap_or_else(|_| "stream".to_string())
        .to_lowercase();
    tracing::info!(mode = %mode, "camera service starting");

    let broker = Arc::new(connect_with_backoff(&redis_url(), CONNECT_ATTEMPTS).await?);

    match mode.as_str() {
        "discover" => run_discover_mode(broker).await,
        _ => run_stream_mode(broker).await,
    }
}

async fn run_discover_mode(broker: Arc<RedisBroker>) -> anyhow::Result<()> {
    let config = broker.read_config("camera").await?.unwrap_or_default();
    let timeout_secs = config.get("timeout").and_then(|v| v.as_u64()).unwrap_or(30);

    let cameras = discover::discover_cameras(Duration::from_secs(timeout_secs)).await;
    broker
        .write_scan("network_camera", &serde_json::to_value(&cameras)?)
        .await?;
    tracing::info!(found = cameras.len(), "discover mode wrote scan:network_camera");
    Ok(())
}

async fn run_stream_mode(broker: Arc<RedisBroker>) -> anyhow::Result<()> {
    let config = broker.read_config("camera").await?.unwrap_or_default();
    let cameras: Vec<CameraConfig> = config
        .get("cameras")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    let output_dir = config
        .get("output_dir")
        .and_then(|v| v.as_str())
        .unwrap_or("/hls")
        .to_string();

    let Some(cam) = cameras.into_iter().next() else {
        anyhow::bail!("no cameras configured");
    };

    let ctx = AppContext::new(broker.clone() as Arc<dyn Broker>, SOURCE_ID);
    let manager = Arc::new(StreamManager::new(
        build_rtsp_url(&cam),
        cam.transport.clone(),
        output_dir,
        HlsSettings::default(),
        10,
        5.0,
    ));

    if cam.ptz_enabled {
        // No concrete ONVIF client is wired into this workspace (SPEC_FULL.md
        // §4.4's resolution of the open PTZ-vendor question); a deployment
        // that needs real PTZ control supplies its own `PtzClient` here.
        tracing::warn!("ptz_enabled is set but no ONVIF client is wired in, ptz_move will fail");
    }
    let ptz: Arc<dyn PtzClient> = Arc::new(NullPtzClient);

    let source: Arc<dyn Source> = Arc::new(CameraSource::new(SOURCE_ID, manager.clone(), 5));
    ctx.broker.write_meta(&ctx.source_id, &source.metadata()).await?;

    if let Err(err) = manager.start().await {
        tracing::error!(error = %err, "failed to start stream on boot");
        ctx.broker
            .write_status(&SourceStatus {
                source_id: SOURCE_ID.to_string(),
                last_poll: Some(now_ts()),
                last_success: None,
                last_error: Some(err.to_string()),
                poll_count: 0,
                error_count: 1,
            })
            .await?;
        return Err(err);
    }

    let handler: Arc<dyn CommandHandler> = Arc::new(CameraCommandHandler::new(
        ctx.clone(),
        manager.clone(),
        ptz,
        cam.ptz_step,
        cam.ptz_zoom_step,
    ));
    let config_listener: Arc<dyn ConfigChangeListener> = Arc::new(NoopConfigListener);

    let mut tasks = JoinSet::new();
    persistent::spawn(&mut tasks, ctx.clone(), source, handler, config_listener, STATUS_INTERVAL);

    let health_manager = manager.clone();
    let mut health_shutdown = ctx.subscribe_shutdown();
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(HEALTH_TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => health_manager.health_tick().await,
                _ = health_shutdown.recv() => return,
            }
        }
    });

    let mut shutdown_rx = ctx.subscribe_shutdown();
    tokio::select! {
        _ = wait_for_os_signal() => {
            tracing::info!("shutdown signal received");
            ctx.shutdown();
        }
        _ = shutdown_rx.recv() => {
            tracing::info!("stop command tripped shutdown");
        }
    }

    while tasks.join_next().await.is_some() {}
    manager.stop().await;
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
