// src/health.rs

//! Periodically checks every source's reported status and writes the
//! orchestrator's own status, mirroring
//! `original_source/services/orchestrator/orchestrator/health.py`'s
//! `HealthMonitor`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sense_broker::{Broker, SourceStatus, now_ts};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const OVERDUE_MULTIPLIER: f64 = 3.0;

fn default_intervals() -> HashMap<&'static str, u64> {
    HashMap::from([
        ("tailscale", 30),
        ("pihole", 30),
        ("system", 30),
        ("co2", 60),
        ("weather", 300),
    ])
}

/// The `aranet4`(schedule name) -> `co2`(source id) rewrite, centralized
/// here so config parsing and health-threshold lookups agree.
pub fn map_schedule_key(key: &str) -> String {
    if key == "aranet4" { "co2".to_string() } else { key.to_string() }
}

pub struct HealthMonitor {
    broker: Arc<dyn Broker>,
    poll_count: AtomicU64,
}

impl HealthMonitor {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            poll_count: AtomicU64::new(0),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval_secs = CHECK_INTERVAL.as_secs(), "health monitor started");
        loop {
            self.check_health().await;
            tokio::select! {
                _ = tokio::time::sleep(CHECK_INTERVAL) => {}
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("health monitor stopped");
    }

    async fn check_health(&self) {
        let poll_count = self.poll_count.fetch_add(1, Ordering::SeqCst) + 1;
        let now = now_ts();

        let schedule_config = self
            .broker
            .read_config("schedule")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();

        let mut intervals: HashMap<String, u64> = default_intervals()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for (key, val) in schedule_config {
            if let Some(n) = val.as_u64() {
                intervals.insert(map_schedule_key(&key), n);
            }
        }

        let statuses = match self.broker.scan_statuses().await {
            Ok(statuses) => statuses,
            Err(err) => {
                error!(error = %err, "failed to scan source statuses");
                return;
            }
        };

        let mut overdue = Vec::new();
        for status in &statuses {
            if status.source_id == "orchestrator" {
                continue;
            }
            let interval = *intervals.get(status.source_id.as_str()).unwrap_or(&60);
            let threshold = interval as f64 * OVERDUE_MULTIPLIER;
            if let Some(last_success) = status.last_success
                && (now - last_success) > threshold
            {
                warn!(
                    source_id = %status.source_id,
                    age_secs = now - last_success,
                    threshold_secs = threshold,
                    "source is overdue"
                );
                overdue.push(status.source_id.clone());
            }
        }

        let own_status = SourceStatus {
            source_id: "orchestrator".to_string(),
            last_poll: Some(now),
            last_success: Some(now),
            last_error: if overdue.is_empty() {
                None
            } else {
                Some(format!("Overdue sources: {}", overdue.join(", ")))
            },
            poll_count,
            error_count: 0,
        };
        if let Err(err) = self.broker.write_status(&own_status).await {
            error!(error = %err, "failed to write orchestrator status");
        }

        if overdue.is_empty() {
            debug!("health check OK: all sources within thresholds");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_broker::FakeBroker;

    #[tokio::test]
    async fn overdue_source_is_flagged_and_healthy_one_is_not() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        broker
            .write_status(&SourceStatus {
                source_id: "system".to_string(),
                last_success: Some(now_ts() - 1000.0),
                ..Default::default()
            })
            .await
            .unwrap();
        broker
            .write_status(&SourceStatus {
                source_id: "weather".to_string(),
                last_success: Some(now_ts()),
                ..Default::default()
            })
            .await
            .unwrap();

        let monitor = HealthMonitor::new(broker.clone());
        monitor.check_health().await;

        let own = broker.read_status("orchestrator").await.unwrap().unwrap();
        assert!(own.last_error.unwrap().contains("system"));
        assert_eq!(own.poll_count, 1);
    }

    #[test]
    fn aranet4_schedule_key_maps_to_co2_source_id() {
        assert_eq!(map_schedule_key("aranet4"), "co2");
        assert_eq!(map_schedule_key("weather"), "weather");
    }
}
