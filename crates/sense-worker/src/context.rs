// src/context.rs

//! The application context every worker task is built from: no module-level
//! globals, a single struct constructed once at process boot and threaded
//! through every spawned task.

use std::sync::Arc;

use sense_broker::Broker;
use tokio::sync::broadcast;

/// Shared state for one worker process: the broker handle, this source's
/// identity, and the shutdown signal every task races its blocking waits
/// against.
#[derive(Clone)]
pub struct AppContext {
    pub broker: Arc<dyn Broker>,
    pub source_id: String,
    shutdown_tx: broadcast::Sender<()>,
}

impl AppContext {
    pub fn new(broker: Arc<dyn Broker>, source_id: impl Into<String>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            broker,
            source_id: source_id.into(),
            shutdown_tx,
        }
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Trips the shutdown signal for every subscriber. Idempotent: a send
    /// with no pending receivers, or a second call, is not an error.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
