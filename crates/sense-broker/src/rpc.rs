// src/rpc.rs

//! The RPC caller pattern: subscribe to the response channel before
//! publishing the command, so a reply sent the instant the command is
//! received can never race ahead of the subscription.

use std::time::Duration;

use crate::client::Broker;
use crate::errors::{Result, SenseError};
use crate::model::{Command, CommandResponse};

/// Publishes `cmd` to `target` and waits up to `timeout` for the matching
/// response. No retry: a timeout is returned to the caller to handle.
pub async fn call(
    broker: &dyn Broker,
    target: &str,
    cmd: Command,
    timeout: Duration,
) -> Result<CommandResponse> {
    let mut sub = broker.subscribe_response(target, cmd.request_id).await?;
    broker.publish_command(target, &cmd).await?;

    match tokio::time::timeout(timeout, sub.recv()).await {
        Ok(Some(response)) => Ok(response),
        Ok(None) => Err(SenseError::Subscription(format!(
            "response channel for '{target}' closed before reply arrived"
        ))),
        Err(_) => Err(SenseError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBroker;
    use std::sync::Arc;

    #[tokio::test]
    async fn call_returns_response_published_by_a_handler() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());

        let handler_broker = broker.clone();
        let mut commands = handler_broker.subscribe_commands("sensors").await.unwrap();
        tokio::spawn(async move {
            let cmd = commands.recv().await.unwrap();
            let response = CommandResponse::ok(cmd.request_id);
            handler_broker
                .publish_response("sensors", cmd.request_id, &response)
                .await
                .unwrap();
        });

        let cmd = Command::new("clear");
        let response = call(&*broker, "sensors", cmd, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn call_times_out_when_nobody_answers() {
        let broker = FakeBroker::new();
        let cmd = Command::new("clear");
        let err = call(&broker, "sensors", cmd, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SenseError::Timeout(_)));
    }
}
