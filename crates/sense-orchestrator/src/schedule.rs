// src/schedule.rs

//! Triggers ephemeral source containers on configurable intervals. Grounded
//! on `original_source/services/orchestrator/orchestrator/schedule.py`'s
//! `Scheduler`: a flat `service -> interval` map, a `last_run` map seeded to
//! zero so everything fires on the first tick, and a plain tick loop rather
//! than one timer per service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sense_broker::now_ts;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tracing::info;

use crate::runner::{DEFAULT_TIMEOUT, Runner};

pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

pub fn default_schedules() -> HashMap<String, u64> {
    HashMap::from([
        ("source-tailscale".to_string(), 30),
        ("source-pihole".to_string(), 30),
        ("source-system".to_string(), 30),
        ("source-aranet4".to_string(), 300),
        ("source-weather".to_string(), 600),
    ])
}

/// Adds the `source-` prefix unless it is already present.
pub fn normalize_service_key(service: &str) -> String {
    if service.starts_with("source-") {
        service.to_string()
    } else {
        format!("source-{service}")
    }
}

pub struct Scheduler {
    runner: Arc<dyn Runner>,
    schedules: Mutex<HashMap<String, u64>>,
    last_run: Mutex<HashMap<String, f64>>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn Runner>, schedules: HashMap<String, u64>) -> Self {
        let last_run = schedules.keys().map(|k| (k.clone(), 0.0)).collect();
        Self {
            runner,
            schedules: Mutex::new(schedules),
            last_run: Mutex::new(last_run),
        }
    }

    /// Hot-reloads schedule intervals. Updates existing services and adds
    /// new ones; never removes a service.
    pub async fn update_schedule(&self, updates: HashMap<String, i64>) {
        let mut schedules = self.schedules.lock().await;
        let mut last_run = self.last_run.lock().await;
        for (service, interval) in updates {
            if interval < 0 {
                continue;
            }
            let key = normalize_service_key(&service);
            let interval = interval as u64;
            if schedules.get(&key) != Some(&interval) {
                info!(service = %key, interval, "schedule updated");
            }
            schedules.insert(key.clone(), interval);
            last_run.entry(key).or_insert(0.0);
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(services = self.schedules.lock().await.len(), "scheduler started");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&mut tasks).await;
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        if !tasks.is_empty() {
            info!(pending = tasks.len(), "waiting for running tasks to finish");
        }
        while tasks.join_next().await.is_some() {}
        info!("scheduler stopped");
    }

    async fn tick(&self, tasks: &mut JoinSet<()>) {
        let now = now_ts();
        let schedules = self.schedules.lock().await.clone();
        let running = self.runner.running().await;
        let mut last_run = self.last_run.lock().await;

        for (service, interval) in schedules {
            let due_since = last_run.get(&service).copied().unwrap_or(0.0);
            if now - due_since >= interval as f64 && !running.contains(&service) {
                last_run.insert(service.clone(), now);
                let runner = self.runner.clone();
                tasks.spawn(async move {
                    runner
                        .run_ephemeral(&service, &HashMap::new(), DEFAULT_TIMEOUT)
                        .await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRunner {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Runner for CountingRunner {
        async fn run_ephemeral(
            &self,
            _service: &str,
            _env: &HashMap<String, String>,
            _timeout: Duration,
        ) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
        async fn start_service(&self, _service: &str) -> bool {
            true
        }
        async fn stop_service(&self, _service: &str) -> bool {
            true
        }
        async fn running(&self) -> HashSet<String> {
            HashSet::new()
        }
    }

    #[tokio::test]
    async fn due_services_trigger_on_first_tick() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner: Arc<dyn Runner> = Arc::new(CountingRunner { calls: calls.clone() });
        let mut schedules = HashMap::new();
        schedules.insert("source-system".to_string(), 30u64);
        let scheduler = Arc::new(Scheduler::new(runner, schedules));

        let mut tasks = JoinSet::new();
        scheduler.tick(&mut tasks).await;
        while tasks.join_next().await.is_some() {}

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn update_schedule_normalizes_and_preserves_unlisted_services() {
        let runner: Arc<dyn Runner> = Arc::new(CountingRunner {
            calls: Arc::new(AtomicU32::new(0)),
        });
        let scheduler = Scheduler::new(runner, default_schedules());
        let mut updates = HashMap::new();
        updates.insert("weather".to_string(), 900i64);
        scheduler.update_schedule(updates).await;

        let schedules = scheduler.schedules.lock().await;
        assert_eq!(schedules.get("source-weather"), Some(&900));
        assert_eq!(schedules.get("source-tailscale"), Some(&30));
    }
}
