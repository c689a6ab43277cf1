// src/display.rs

//! The command-and-config half of the `sensors` persistent worker: an
//! in-memory stand-in for the Sense HAT LED matrix, grounded on
//! `original_source/services/source-sensehat/sensehat/{commands,display,
//! main}.py`. Actual LED rendering is out of spec.md §1's scope (listed
//! alongside the sleep schedule as an external collaborator); what's
//! implemented here is the part spec.md §6.1 cares about: the `cmd:sensors`
//! command surface (`clear`, `set_rotation`, `get_matrix`) and the
//! `display`/`sleep` sections of `config:changed` hot-reload, against a
//! pixel buffer this process owns instead of real hardware.

use std::sync::Arc;

use async_trait::async_trait;
use sense_broker::{Broker, Command, CommandResponse};
use sense_worker::{CommandHandler, ConfigChangeListener};
use tokio::sync::Mutex;
use tracing::info;

const VALID_ROTATIONS: [i64; 4] = [0, 90, 180, 270];

struct Inner {
    pixels: Vec<Vec<[u8; 3]>>,
    mode: String,
    rotation: i64,
    scroll_speed: f64,
    icon_duration: f64,
    sleep_start: i64,
    sleep_end: i64,
}

impl Inner {
    fn blank_pixels() -> Vec<Vec<[u8; 3]>> {
        vec![vec![[0, 0, 0]; 8]; 8]
    }
}

/// Shared LED-matrix stand-in. Cloneable: every clone shares the same
/// pixel buffer, matching the single `SenseHatDisplay` instance the
/// original wires into both its command handler and its render loop.
#[derive(Clone)]
pub struct DisplayState {
    broker: Arc<dyn Broker>,
    inner: Arc<Mutex<Inner>>,
}

impl DisplayState {
    pub fn new(broker: Arc<dyn Broker>, rotation: i64, scroll_speed: f64, icon_duration: f64) -> Self {
        Self {
            broker,
            inner: Arc::new(Mutex::new(Inner {
                pixels: Inner::blank_pixels(),
                mode: "idle".to_string(),
                rotation,
                scroll_speed,
                icon_duration,
                sleep_start: 23,
                sleep_end: 7,
            })),
        }
    }
}

#[async_trait]
impl CommandHandler for DisplayState {
    async fn handle_command(&self, cmd: &Command) -> anyhow::Result<CommandResponse> {
        match cmd.action.as_str() {
            "clear" => {
                let mut inner = self.inner.lock().await;
                inner.pixels = Inner::blank_pixels();
                inner.mode = "idle".to_string();
                let mut data = std::collections::HashMap::new();
                data.insert(
                    "message".to_string(),
                    serde_json::Value::String("Display cleared".to_string()),
                );
                Ok(CommandResponse::ok_with(cmd.request_id, data))
            }
            "set_rotation" => {
                let rotation = cmd.param_f64("rotation").unwrap_or(0.0) as i64;
                if !VALID_ROTATIONS.contains(&rotation) {
                    return Ok(CommandResponse::error(
                        cmd.request_id,
                        format!("Invalid rotation: {rotation}. Must be 0, 90, 180, or 270."),
                    ));
                }
                let mut inner = self.inner.lock().await;
                inner.rotation = rotation;
                let mut data = std::collections::HashMap::new();
                data.insert("rotation".to_string(), serde_json::json!(rotation));
                Ok(CommandResponse::ok_with(cmd.request_id, data))
            }
            "get_matrix" => {
                let inner = self.inner.lock().await;
                let mut data = std::collections::HashMap::new();
                data.insert("pixels".to_string(), serde_json::json!(inner.pixels));
                data.insert("mode".to_string(), serde_json::json!(inner.mode));
                data.insert("rotation".to_string(), serde_json::json!(inner.rotation));
                Ok(CommandResponse::ok_with(cmd.request_id, data))
            }
            other => Ok(CommandResponse::error(
                cmd.request_id,
                format!("Unknown action: {other}"),
            )),
        }
    }
}

#[async_trait]
impl ConfigChangeListener for DisplayState {
    async fn on_config_changed(&self, section: &str) {
        match section {
            "display" => {
                if let Ok(Some(cfg)) = self.broker.read_config("display").await {
                    let mut inner = self.inner.lock().await;
                    if let Some(rotation) = cfg.get("rotation").and_then(|v| v.as_i64()) {
                        inner.rotation = rotation;
                    }
                    if let Some(scroll_speed) = cfg.get("scroll_speed").and_then(|v| v.as_f64()) {
                        inner.scroll_speed = scroll_speed;
                    }
                    if let Some(icon_duration) = cfg.get("icon_duration").and_then(|v| v.as_f64()) {
                        inner.icon_duration = icon_duration;
                    }
                    info!(rotation = inner.rotation, "display config reloaded");
                }
            }
            "sleep" => {
                if let Ok(Some(cfg)) = self.broker.read_config("sleep").await {
                    let mut inner = self.inner.lock().await;
                    if let Some(start) = cfg.get("start_hour").and_then(|v| v.as_i64()) {
                        inner.sleep_start = start;
                    }
                    if let Some(end) = cfg.get("end_hour").and_then(|v| v.as_i64()) {
                        inner.sleep_end = end;
                    }
                    info!(start = inner.sleep_start, end = inner.sleep_end, "sleep config reloaded");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_broker::FakeBroker;

    fn broker() -> Arc<dyn Broker> {
        Arc::new(FakeBroker::new())
    }

    #[tokio::test]
    async fn clear_resets_pixels_and_acknowledges() {
        let display = DisplayState::new(broker(), 0, 0.08, 1.5);
        let resp = display
            .handle_command(&Command::new("clear"))
            .await
            .unwrap();
        assert!(resp.is_ok());
        assert_eq!(
            resp.data.get("message").unwrap(),
            &serde_json::json!("Display cleared")
        );
    }

    #[tokio::test]
    async fn set_rotation_rejects_invalid_values() {
        let display = DisplayState::new(broker(), 0, 0.08, 1.5);
        let mut cmd = Command::new("set_rotation");
        cmd.params.insert("rotation".to_string(), serde_json::json!(45));
        let resp = display.handle_command(&cmd).await.unwrap();
        assert!(!resp.is_ok());
        assert!(resp.error.unwrap().contains("Invalid rotation"));
    }

    #[tokio::test]
    async fn set_rotation_accepts_valid_values() {
        let display = DisplayState::new(broker(), 0, 0.08, 1.5);
        let mut cmd = Command::new("set_rotation");
        cmd.params.insert("rotation".to_string(), serde_json::json!(180));
        let resp = display.handle_command(&cmd).await.unwrap();
        assert!(resp.is_ok());

        let matrix = display
            .handle_command(&Command::new("get_matrix"))
            .await
            .unwrap();
        assert_eq!(matrix.data.get("rotation").unwrap(), &serde_json::json!(180));
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let display = DisplayState::new(broker(), 0, 0.08, 1.5);
        let resp = display
            .handle_command(&Command::new("dance"))
            .await
            .unwrap();
        assert!(!resp.is_ok());
        assert!(resp.error.unwrap().contains("Unknown action"));
    }
}
