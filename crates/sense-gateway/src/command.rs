// src/command.rs

//! `POST /api/command/{target}`: the command-to-RPC bridge. Grounded on
//! `original_source/services/web-gateway/gateway/routes/command.py`'s
//! `dispatch_command` — validates `target` against a closed set, applies a
//! per-action timeout, and translates the broker RPC outcome into a flat
//! `{success, message, data}` body rather than forwarding the wire types
//! directly.

use std::collections::HashMap;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use sense_broker::Command;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::state::GatewayState;

const KNOWN_TARGETS: &[&str] = &["sensors", "network_camera", "orchestrator"];
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

fn action_timeout(action: &str) -> Duration {
    match action {
        "start_camera" => Duration::from_secs(10),
        "scan_aranet4" | "discover_cameras" => Duration::from_secs(30),
        _ => DEFAULT_TIMEOUT,
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    action: Option<String>,
    #[serde(default)]
    params: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct CommandResult {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<HashMap<String, Value>>,
}

pub async fn dispatch_command(
    State(state): State<GatewayState>,
    Path(target): Path<String>,
    Json(body): Json<CommandRequest>,
) -> impl IntoResponse {
    if !KNOWN_TARGETS.contains(&target.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "detail": format!(
                    "Unknown target '{target}'. Must be one of: {}",
                    KNOWN_TARGETS.join(", ")
                )
            })),
        )
            .into_response();
    }

    let Some(action) = body.action.filter(|a| !a.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Missing 'action' field"})),
        )
            .into_response();
    };

    let mut cmd = Command::new(action.clone());
    cmd.params = body.params;
    let timeout = action_timeout(&action);

    match sense_broker::rpc::call(&*state.broker, &target, cmd, timeout).await {
        Ok(response) if response.is_ok() => {
            let message = response
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Command executed")
                .to_string();
            Json(CommandResult {
                success: true,
                message,
                data: (!response.data.is_empty()).then_some(response.data),
            })
            .into_response()
        }
        Ok(response) => Json(CommandResult {
            success: false,
            message: response.error.unwrap_or_else(|| "Command failed".to_string()),
            data: (!response.data.is_empty()).then_some(response.data),
        })
        .into_response(),
        Err(sense_broker::SenseError::Timeout(_)) => Json(CommandResult {
            success: false,
            message: format!("Timeout waiting for response from '{target}' (action: {action})"),
            data: None,
        })
        .into_response(),
        Err(err) => Json(CommandResult {
            success: false,
            message: err.to_string(),
            data: None,
        })
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_broker::{Broker, CommandResponse, FakeBroker};
    use std::sync::Arc;

    #[tokio::test]
    async fn unknown_target_is_rejected_before_touching_the_broker() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let state = GatewayState::new(broker, "/tmp");
        let response = dispatch_command(
            State(state),
            Path("not_a_real_target".to_string()),
            Json(CommandRequest {
                action: Some("whatever".to_string()),
                params: HashMap::new(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn successful_round_trip_reports_success() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let handler_broker = broker.clone();
        let mut sub = handler_broker.subscribe_commands("sensors").await.unwrap();
        tokio::spawn(async move {
            let cmd = sub.recv().await.unwrap();
            let response = CommandResponse::ok(cmd.request_id);
            handler_broker
                .publish_response("sensors", cmd.request_id, &response)
                .await
                .unwrap();
        });

        let state = GatewayState::new(broker, "/tmp");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let response = dispatch_command(
            State(state),
            Path("sensors".to_string()),
            Json(CommandRequest {
                action: Some("clear".to_string()),
                params: HashMap::new(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
