// src/runner.rs

//! The `Runner` trait narrows every container-runtime invocation the
//! orchestrator needs down to four operations, and `ComposeRunner` realizes
//! it against `docker compose` exactly as
//! `original_source/services/orchestrator/orchestrator/runner.py` does. The
//! specific runtime behind the trait is swappable; nothing else in this
//! crate knows it is Compose.

use std::collections::HashMap;
use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Default timeout for an ephemeral container run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `service` via `docker compose run --rm`, waiting up to `timeout`.
    /// Returns `true` on exit code 0. Refuses to double-spawn a service
    /// already in `running()`.
    async fn run_ephemeral(
        &self,
        service: &str,
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> bool;

    /// Starts a long-running service via `docker compose up -d`.
    async fn start_service(&self, service: &str) -> bool;

    /// Stops a long-running service via `docker compose stop`.
    async fn stop_service(&self, service: &str) -> bool;

    /// Services this runner currently considers in flight or started.
    async fn running(&self) -> HashSet<String>;
}

pub struct ComposeRunner {
    project_name: String,
    running: Mutex<HashSet<String>>,
}

impl ComposeRunner {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            running: Mutex::new(HashSet::new()),
        }
    }

    fn base_cmd(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose").arg("-p").arg(&self.project_name);
        cmd
    }
}

#[async_trait]
impl Runner for ComposeRunner {
    async fn run_ephemeral(
        &self,
        service: &str,
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> bool {
        {
            let mut running = self.running.lock().await;
            if running.contains(service) {
                warn!(service, "service is already running, skipping");
                return false;
            }
            running.insert(service.to_string());
        }

        let result = async {
            let mut cmd = self.base_cmd();
            cmd.arg("--profile").arg("poll").arg("run").arg("--rm");
            for (key, val) in env {
                cmd.arg("-e").arg(format!("{key}={val}"));
            }
            cmd.arg(service);
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            cmd.kill_on_drop(true);

            debug!(service, ?cmd, "running ephemeral container");
            let child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    error!(service, error = %err, "failed to spawn ephemeral container");
                    return false;
                }
            };

            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(Ok(output)) if output.status.success() => {
                    info!(service, "ephemeral container completed successfully");
                    true
                }
                Ok(Ok(output)) => {
                    error!(
                        service,
                        code = output.status.code(),
                        stdout = %String::from_utf8_lossy(&output.stdout),
                        stderr = %String::from_utf8_lossy(&output.stderr),
                        "ephemeral container failed"
                    );
                    false
                }
                Ok(Err(err)) => {
                    error!(service, error = %err, "failed to wait on ephemeral container");
                    false
                }
                Err(_) => {
                    error!(service, timeout_secs = timeout.as_secs(), "ephemeral container timed out");
                    false
                }
            }
        }
        .await;

        self.running.lock().await.remove(service);
        result
    }

    async fn start_service(&self, service: &str) -> bool {
        {
            let mut running = self.running.lock().await;
            if running.contains(service) {
                warn!(service, "service is already running, skipping start");
                return false;
            }
            running.insert(service.to_string());
        }

        let mut cmd = self.base_cmd();
        cmd.arg("--profile").arg("camera").arg("up").arg("-d").arg(service);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!(service, ?cmd, "starting service");

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(err) => {
                error!(service, error = %err, "failed to spawn docker compose up");
                self.running.lock().await.remove(service);
                return false;
            }
        };

        if output.status.success() {
            info!(service, "service started successfully");
            true
        } else {
            error!(
                service,
                code = output.status.code(),
                stdout = %String::from_utf8_lossy(&output.stdout),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "failed to start service"
            );
            self.running.lock().await.remove(service);
            false
        }
    }

    async fn stop_service(&self, service: &str) -> bool {
        let mut cmd = self.base_cmd();
        cmd.arg("--profile").arg("camera").arg("stop").arg(service);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!(service, ?cmd, "stopping service");

        let output = cmd.output().await;
        self.running.lock().await.remove(service);

        match output {
            Ok(output) if output.status.success() => {
                info!(service, "service stopped successfully");
                true
            }
            Ok(output) => {
                error!(
                    service,
                    code = output.status.code(),
                    stdout = %String::from_utf8_lossy(&output.stdout),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "failed to stop service"
                );
                false
            }
            Err(err) => {
                error!(service, error = %err, "failed to spawn docker compose stop");
                false
            }
        }
    }

    async fn running(&self) -> HashSet<String> {
        self.running.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_ephemeral_against_missing_binary_returns_false() {
        let runner = ComposeRunner::new("sense-pulse-test");
        // "docker" is assumed absent or unconfigured in the test sandbox; a
        // missing binary and a present-but-erroring compose project both
        // resolve to `false` here.
        let ok = runner
            .run_ephemeral("source-does-not-exist", &HashMap::new(), Duration::from_secs(5))
            .await;
        assert!(!ok || runner.running().await.is_empty());
        assert!(runner.running().await.is_empty());
    }

    #[tokio::test]
    async fn double_spawn_of_running_service_is_rejected() {
        let runner = ComposeRunner::new("sense-pulse-test");
        runner.running.lock().await.insert("source-system".to_string());
        let ok = runner
            .run_ephemeral("source-system", &HashMap::new(), Duration::from_secs(1))
            .await;
        assert!(!ok);
    }
}
