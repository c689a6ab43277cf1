// src/commands.rs

//! Listens on `cmd:orchestrator` and dispatches each command to the
//! matching handler, mirroring
//! `original_source/services/orchestrator/orchestrator/commands.py`'s
//! `CommandListener`: one spawned task per inbound command so a slow
//! handler (a container run) never blocks the next command's dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sense_broker::{Broker, Command, CommandResponse};
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::runner::{DEFAULT_TIMEOUT, Runner};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

pub struct CommandDispatcher {
    broker: Arc<dyn Broker>,
    runner: Arc<dyn Runner>,
}

impl CommandDispatcher {
    pub fn new(broker: Arc<dyn Broker>, runner: Arc<dyn Runner>) -> Self {
        Self { broker, runner }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let mut sub = match self.broker.subscribe_commands("orchestrator").await {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(error = %err, "orchestrator command subscription failed, retrying");
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
                            Some(cmd) => {
                                let this = self.clone();
                                tokio::spawn(async move { this.handle_command(cmd).await });
                            }
                            None => {
                                warn!("orchestrator command subscription closed, resubscribing");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("command dispatcher shutting down");
                        return;
                    }
                }
            }

            if sleep_or_shutdown(&mut shutdown_rx).await {
                return;
            }
        }
    }

    async fn handle_command(&self, cmd: Command) {
        let response = match cmd.action.as_str() {
            "start_camera" => self.handle_start_camera(&cmd).await,
            "stop_camera" => self.handle_stop_camera(&cmd).await,
            "trigger" => self.handle_trigger(&cmd).await,
            "scan_aranet4" => self.handle_scan_aranet4(&cmd).await,
            "discover_cameras" => self.handle_discover_cameras(&cmd).await,
            "restart_service" => self.handle_restart_service(&cmd).await,
            other => {
                warn!(action = other, "unknown orchestrator command action");
                CommandResponse::error(cmd.request_id, format!("Unknown action: {other}"))
            }
        };

        if let Err(err) = self
            .broker
            .publish_response("orchestrator", cmd.request_id, &response)
            .await
        {
            error!(error = %err, "failed to publish orchestrator command response");
        }
    }

    async fn handle_start_camera(&self, cmd: &Command) -> CommandResponse {
        if self.runner.start_service("source-camera").await {
            CommandResponse::ok(cmd.request_id)
        } else {
            CommandResponse::error(cmd.request_id, "Failed to start camera service")
        }
    }

    async fn handle_stop_camera(&self, cmd: &Command) -> CommandResponse {
        let stop_cmd = Command::new("stop");
        if let Err(err) = self.broker.publish_command("network_camera", &stop_cmd).await {
            return CommandResponse::error(cmd.request_id, err.to_string());
        }
        CommandResponse::ok(cmd.request_id)
    }

    async fn handle_trigger(&self, cmd: &Command) -> CommandResponse {
        let Some(service) = cmd.param_str("service") else {
            return CommandResponse::error(cmd.request_id, "Missing 'service' parameter");
        };
        if self
            .runner
            .run_ephemeral(service, &HashMap::new(), DEFAULT_TIMEOUT)
            .await
        {
            CommandResponse::ok(cmd.request_id)
        } else {
            CommandResponse::error(cmd.request_id, format!("Failed to run {service}"))
        }
    }

    async fn handle_scan_aranet4(&self, cmd: &Command) -> CommandResponse {
        let env = HashMap::from([("MODE".to_string(), "scan".to_string())]);
        if !self
            .runner
            .run_ephemeral("source-aranet4", &env, DEFAULT_TIMEOUT)
            .await
        {
            return CommandResponse::error(cmd.request_id, "Aranet4 scan failed");
        }

        let devices = self
            .broker
            .read_scan("co2")
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| serde_json::json!([]));
        CommandResponse::ok_with(
            cmd.request_id,
            HashMap::from([("devices".to_string(), devices)]),
        )
    }

    async fn handle_discover_cameras(&self, cmd: &Command) -> CommandResponse {
        let env = HashMap::from([("MODE".to_string(), "discover".to_string())]);
        if !self
            .runner
            .run_ephemeral("source-camera", &env, DEFAULT_TIMEOUT)
            .await
        {
            return CommandResponse::error(cmd.request_id, "Camera discovery failed");
        }

        let cameras = self
            .broker
            .read_scan("network_camera")
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| serde_json::json!([]));
        CommandResponse::ok_with(
            cmd.request_id,
            HashMap::from([("cameras".to_string(), cameras)]),
        )
    }

    async fn handle_restart_service(&self, cmd: &Command) -> CommandResponse {
        let Some(service) = cmd.param_str("service") else {
            return CommandResponse::error(cmd.request_id, "Missing 'service' parameter");
        };
        self.runner.stop_service(service).await;
        if self.runner.start_service(service).await {
            CommandResponse::ok(cmd.request_id)
        } else {
            CommandResponse::error(cmd.request_id, format!("Failed to restart {service}"))
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
    use sense_broker::FakeBroker;
    use std::time::Duration as StdDuration;

    use crate::runner::ComposeRunner;

    #[tokio::test]
    async fn unknown_action_yields_error_response() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let runner: Arc<dyn Runner> = Arc::new(ComposeRunner::new("sense-pulse-test"));
        let dispatcher = Arc::new(CommandDispatcher::new(broker.clone(), runner));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(dispatcher.clone().run(shutdown_rx));
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let cmd = Command::new("do_a_backflip");
        let response = sense_broker::rpc::call(&*broker, "orchestrator", cmd, StdDuration::from_secs(1))
            .await
            .unwrap();
        assert!(!response.is_ok());
        assert!(response.error.unwrap().contains("Unknown action"));

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }

    #[tokio::test]
    async fn trigger_without_service_param_is_rejected() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let runner: Arc<dyn Runner> = Arc::new(ComposeRunner::new("sense-pulse-test"));
        let dispatcher = Arc::new(CommandDispatcher::new(broker.clone(), runner));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(dispatcher.clone().run(shutdown_rx));
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let cmd = Command::new("trigger");
        let response = sense_broker::rpc::call(&*broker, "orchestrator", cmd, StdDuration::from_secs(1))
            .await
            .unwrap();
        assert!(!response.is_ok());
        assert!(response.error.unwrap().contains("Missing 'service'"));

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }
}
