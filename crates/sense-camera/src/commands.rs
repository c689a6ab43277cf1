// src/commands.rs

//! Wires camera commands (`start`/`stop`/`restart`/`ptz_move`) onto the
//! `StreamManager` and `PtzClient`, as the `CommandHandler` the persistent
//! worker base dispatches to. Grounded on
//! `original_source/services/source-camera/camera/main.py`'s
//! `_handle_command` dispatch table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sense_broker::{Command, CommandResponse};
use sense_worker::{AppContext, CommandHandler};
use tokio::sync::Mutex as AsyncMutex;

use crate::manager::StreamManager;
use crate::ptz::{PtzClient, PtzDirection, PtzVelocity};

/// Held for the duration of a `ptz_move` continuous-move-then-stop sequence
/// so two operator commands in flight can't interleave their velocities.
const MOVE_HOLD: Duration = Duration::from_millis(300);

pub struct CameraCommandHandler {
    ctx: AppContext,
    manager: Arc<StreamManager>,
    ptz: Arc<dyn PtzClient>,
    ptz_step: f64,
    ptz_zoom_step: f64,
    ptz_lock: AsyncMutex<()>,
}

impl CameraCommandHandler {
    pub fn new(
        ctx: AppContext,
        manager: Arc<StreamManager>,
        ptz: Arc<dyn PtzClient>,
        ptz_step: f64,
        ptz_zoom_step: f64,
    ) -> Self {
        Self {
            ctx,
            manager,
            ptz,
            ptz_step,
            ptz_zoom_step,
            ptz_lock: AsyncMutex::new(()),
        }
    }

    async fn handle_ptz_move(&self, cmd: &Command) -> anyhow::Result<CommandResponse> {
        let direction = cmd
            .param_str("direction")
            .ok_or_else(|| anyhow::anyhow!("ptz_move requires a direction param"))?;
        let direction = PtzDirection::parse(direction)
            .ok_or_else(|| anyhow::anyhow!("unknown ptz direction: {direction}"))?;

        if !self.ptz.is_initialized() {
            self.ptz.initialize().await?;
        }

        let step_override = cmd.param_f64("step");
        let velocity = direction.velocity(self.ptz_step, self.ptz_zoom_step, step_override);

        let _guard = self.ptz_lock.lock().await;
        self.ptz.continuous_move(velocity).await?;
        tokio::time::sleep(MOVE_HOLD).await;
        self.ptz
            .continuous_move(PtzVelocity {
                pan: 0.0,
                tilt: 0.0,
                zoom: 0.0,
            })
            .await?;

        Ok(CommandResponse::ok(cmd.request_id))
    }
}

#[async_trait]
impl CommandHandler for CameraCommandHandler {
    async fn handle_command(&self, cmd: &Command) -> anyhow::Result<CommandResponse> {
        match cmd.action.as_str() {
            "start" => {
                self.manager.start().await?;
                Ok(CommandResponse::ok(cmd.request_id))
            }
            "stop" => {
                self.manager.stop().await;
                Ok(CommandResponse::ok(cmd.request_id))
            }
            "restart" => {
                self.manager.restart().await?;
                Ok(CommandResponse::ok(cmd.request_id))
            }
            "ptz_move" => self.handle_ptz_move(cmd).await,
            other => anyhow::bail!("unknown camera command: {other}"),
        }
    }

    /// `stop`'s response must already be on the wire before `stream:ended`
    /// and shutdown, so the command task's own exit doesn't race the reply.
    async fn after_response(&self, cmd: &Command) {
        if cmd.action != "stop" {
            return;
        }
        if let Err(err) = self
            .ctx
            .broker
            .publish_stream_ended(&self.ctx.source_id, "user_stopped")
            .await
        {
            tracing::error!(
                source_id = %self.ctx.source_id,
                error = %err,
                "failed to publish stream:ended"
            );
        }
        self.ctx.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HlsSettings;
    use crate::ptz::test_support::RecordingPtzClient;
    use sense_broker::{Broker, FakeBroker};

    fn handler() -> (CameraCommandHandler, AppContext, Arc<dyn Broker>, Arc<RecordingPtzClient>) {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let ctx = AppContext::new(broker.clone(), "network_camera");
        let dir = std::env::temp_dir().join(format!("sense-camera-cmd-test-{}", std::process::id()));
        let manager = Arc::new(StreamManager::new(
            "rtsp://127.0.0.1/stream1",
            "tcp",
            dir,
            HlsSettings::default(),
            10,
            5.0,
        ));
        let ptz = Arc::new(RecordingPtzClient::default());
        let handler = CameraCommandHandler::new(ctx.clone(), manager, ptz.clone(), 0.05, 0.1);
        (handler, ctx, broker, ptz)
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let (handler, _ctx, _broker, _ptz) = handler();
        let cmd = Command::new("levitate");
        assert!(handler.handle_command(&cmd).await.is_err());
    }

    #[tokio::test]
    async fn ptz_move_records_scaled_velocity_then_zero_stop() {
        let (handler, _ctx, _broker, ptz) = handler();
        let mut cmd = Command::new("ptz_move");
        cmd.params.insert("direction".into(), "left".into());

        let response = handler.handle_command(&cmd).await.unwrap();
        assert!(response.is_ok());

        let moves = ptz.moves.lock().await;
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0], PtzVelocity { pan: -0.05, tilt: 0.0, zoom: 0.0 });
        assert_eq!(moves[1], PtzVelocity { pan: 0.0, tilt: 0.0, zoom: 0.0 });
    }

    #[tokio::test]
    async fn ptz_move_without_direction_is_rejected() {
        let (handler, _ctx, _broker, _ptz) = handler();
        let cmd = Command::new("ptz_move");
        assert!(handler.handle_command(&cmd).await.is_err());
    }

    #[tokio::test]
    async fn stop_then_after_response_publishes_stream_ended_and_trips_shutdown() {
        let (handler, ctx, broker, _ptz) = handler();
        let mut shutdown_rx = ctx.subscribe_shutdown();
        let mut sub = broker.subscribe_stream_ended().await.unwrap();

        let cmd = Command::new("stop");
        let response = handler.handle_command(&cmd).await.unwrap();
        assert!(response.is_ok());
        handler.after_response(&cmd).await;

        let ended = sub.recv().await.unwrap();
        assert_eq!(ended.reason, "user_stopped");
        assert!(shutdown_rx.try_recv().is_ok());
    }
}
