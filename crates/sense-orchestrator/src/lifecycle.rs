// src/lifecycle.rs

//! Subscribes to `stream:ended` and tears the camera container down,
//! mirroring
//! `original_source/services/orchestrator/orchestrator/lifecycle.py`'s
//! `LifecycleListener`.

use std::sync::Arc;
use std::time::Duration;

use sense_broker::{Broker, SourceStatus};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::runner::Runner;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const CLEANUP_DELAY: Duration = Duration::from_secs(2);

pub struct LifecycleListener {
    broker: Arc<dyn Broker>,
    runner: Arc<dyn Runner>,
}

impl LifecycleListener {
    pub fn new(broker: Arc<dyn Broker>, runner: Arc<dyn Runner>) -> Self {
        Self { broker, runner }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("lifecycle listener started");
        loop {
            let mut sub = match self.broker.subscribe_stream_ended().await {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(error = %err, "stream:ended subscription failed, retrying");
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
                            Some(event) => self.handle(event).await,
                            None => {
                                warn!("stream:ended subscription closed, resubscribing");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("lifecycle listener shutting down");
                        return;
                    }
                }
            }

            if sleep_or_shutdown(&mut shutdown_rx).await {
                return;
            }
        }
    }

    async fn handle(&self, event: sense_broker::StreamEnded) {
        info!(source_id = %event.source_id, reason = %event.reason, "stream ended");
        tokio::time::sleep(CLEANUP_DELAY).await;

        self.runner.stop_service("source-camera").await;

        let status = SourceStatus {
            source_id: "network_camera".to_string(),
            last_error: Some(format!("Stream ended: {}", event.reason)),
            ..Default::default()
        };
        if let Err(err) = self.broker.write_status(&status).await {
            error!(error = %err, "failed to write post-cleanup camera status");
        }
    }
}

async fn sleep_or_shutdown(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => false,
        _ = shutdown_rx.recv() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sense_broker::FakeBroker;
    use std::collections::HashMap;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingRunner {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Runner for RecordingRunner {
        async fn run_ephemeral(
            &self,
            _service: &str,
            _env: &HashMap<String, String>,
            _timeout: Duration,
        ) -> bool {
            true
        }
        async fn start_service(&self, _service: &str) -> bool {
            true
        }
        async fn stop_service(&self, service: &str) -> bool {
            assert_eq!(service, "source-camera");
            self.stopped.store(true, Ordering::SeqCst);
            true
        }
        async fn running(&self) -> HashSet<String> {
            HashSet::new()
        }
    }

    #[tokio::test]
    async fn stream_ended_stops_camera_and_writes_status() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let stopped = Arc::new(AtomicBool::new(false));
        let runner: Arc<dyn Runner> = Arc::new(RecordingRunner {
            stopped: stopped.clone(),
        });
        let listener = Arc::new(LifecycleListener::new(broker.clone(), runner));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(listener.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(10)).await;

        broker
            .publish_stream_ended("network_camera", "user_stopped")
            .await
            .unwrap();

        tokio::time::sleep(CLEANUP_DELAY + Duration::from_millis(100)).await;
        assert!(stopped.load(Ordering::SeqCst));

        let status = broker.read_status("network_camera").await.unwrap().unwrap();
        assert_eq!(status.last_error.unwrap(), "Stream ended: user_stopped");

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }
}
