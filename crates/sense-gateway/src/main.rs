// src/main.rs

//! The gateway process entry point: connects to the broker, binds the HTTP
//! listener, and serves until a shutdown signal. Grounded on the teacher's
//! `server/metrics_server.rs` axum-serving pattern (bind, serve,
//! `with_graceful_shutdown`) rather than `app.py`'s FastAPI/uvicorn
//! lifespan, since this workspace speaks axum throughout.

use std::net::SocketAddr;
use std::sync::Arc;

use sense_broker::{Broker, connect_with_backoff};
use sense_gateway::{GatewayState, build_router};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const CONNECT_ATTEMPTS: u32 = 10;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379".to_string())
}

fn gateway_port() -> u16 {
    std::env::var("GATEWAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8000)
}

fn hls_dir() -> String {
    std::env::var("HLS_DIR").unwrap_or_else(|_| "/hls".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("gateway starting");

    let broker: Arc<dyn Broker> = Arc::new(connect_with_backoff(&redis_url(), CONNECT_ATTEMPTS).await?);
    let state = GatewayState::new(broker, hls_dir());
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], gateway_port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_os_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
        })
        .await?;

    tracing::info!("gateway stopped");
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
