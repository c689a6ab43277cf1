// src/bin/system.rs

//! Ephemeral system-metrics worker entry point. Grounded on
//! `original_source/services/source-system/system/main.py`.

use std::sync::Arc;

use sense_broker::{Broker, connect_with_backoff};
use sense_sources::SystemSource;
use sense_worker::{AppContext, ephemeral};
use tracing_subscriber::EnvFilter;

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
    let ctx = AppContext::new(broker, "system");
    let source = SystemSource;
    ephemeral::run(&ctx, &source).await;
    Ok(())
}
