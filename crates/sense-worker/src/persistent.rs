// src/persistent.rs

//! The persistent worker base (C3): three cooperative tasks (poll, command
//! listener, config listener) sharing one `AppContext`, spawned into a
//! caller-owned `JoinSet` and raced against a broadcast shutdown signal —
//! the same shape the teacher uses for its own background task roster.

use std::sync::Arc;
use std::time::Duration;

use sense_broker::{CommandResponse, SourceStatus, now_ts};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::hooks::{CommandHandler, ConfigChangeListener, Source};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Spawns the poll, command listener, and config listener tasks for one
/// persistent worker into `tasks`. The caller owns `tasks` and `ctx`'s
/// shutdown sender, and is responsible for draining `tasks` after calling
/// `ctx.shutdown()`.
pub fn spawn(
    tasks: &mut JoinSet<()>,
    ctx: AppContext,
    source: Arc<dyn Source>,
    handler: Arc<dyn CommandHandler>,
    config_listener: Arc<dyn ConfigChangeListener>,
    interval: Duration,
) {
    let poll_ctx = ctx.clone();
    let poll_source = source.clone();
    tasks.spawn(async move { run_poll_task(poll_ctx, poll_source, interval).await });

    let cmd_ctx = ctx.clone();
    tasks.spawn(async move { run_command_task(cmd_ctx, handler).await });

    let cfg_ctx = ctx;
    tasks.spawn(async move { run_config_task(cfg_ctx, config_listener).await });
}

async fn run_poll_task(ctx: AppContext, source: Arc<dyn Source>, interval: Duration) {
    let mut shutdown_rx = ctx.subscribe_shutdown();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut poll_count: u64 = 0;
    let mut error_count: u64 = 0;
    let mut last_success: Option<f64> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poll_once(&ctx, source.as_ref(), &mut poll_count, &mut error_count, &mut last_success).await;
            }
            _ = shutdown_rx.recv() => {
                info!(source_id = %ctx.source_id, "poll task shutting down");
                return;
            }
        }
    }
}

/// Runs one poll and writes its status. `poll_count`/`error_count`/
/// `last_success` are the poll task's own in-memory state, not re-derived
/// from the broker's `status:{source_id}` key each tick — that key carries
/// a TTL and a lost or delayed write must not reset the counters.
async fn poll_once(
    ctx: &AppContext,
    source: &dyn Source,
    poll_count: &mut u64,
    error_count: &mut u64,
    last_success: &mut Option<f64>,
) {
    let t0 = now_ts();

    let status = match source.poll().await {
        Ok(readings) => {
            if let Err(err) = ctx.broker.write_readings(&ctx.source_id, &readings).await {
                error!(source_id = %ctx.source_id, error = %err, "failed to write readings");
            }
            *poll_count += 1;
            *last_success = Some(now_ts());
            SourceStatus {
                source_id: ctx.source_id.clone(),
                last_poll: Some(t0),
                last_success: *last_success,
                last_error: None,
                poll_count: *poll_count,
                error_count: *error_count,
            }
        }
        Err(err) => {
            warn!(source_id = %ctx.source_id, error = %err, "poll failed");
            *error_count += 1;
            SourceStatus {
                source_id: ctx.source_id.clone(),
                last_poll: Some(t0),
                last_success: *last_success,
                last_error: Some(err.to_string()),
                poll_count: *poll_count,
                error_count: *error_count,
            }
        }
    };

    let published = status.last_error.is_none();
    if let Err(err) = ctx.broker.write_status(&status).await {
        error!(source_id = %ctx.source_id, error = %err, "failed to write status");
    }
    if published {
        if let Err(err) = ctx.broker.publish_data(&ctx.source_id).await {
            error!(source_id = %ctx.source_id, error = %err, "failed to publish data notification");
        }
    }
}

async fn run_command_task(ctx: AppContext, handler: Arc<dyn CommandHandler>) {
    let mut shutdown_rx = ctx.subscribe_shutdown();
    loop {
        let mut sub = match ctx.broker.subscribe_commands(&ctx.source_id).await {
            Ok(sub) => sub,
            Err(err) => {
                warn!(source_id = %ctx.source_id, error = %err, "command subscription failed, retrying");
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
                            let request_id = cmd.request_id;
                            let response = match handler.handle_command(&cmd).await {
                                Ok(response) => response,
                                Err(err) => {
                                    warn!(source_id = %ctx.source_id, error = %err, "command handler failed");
                                    CommandResponse::error(request_id, err.to_string())
                                }
                            };
                            if let Err(err) = ctx
                                .broker
                                .publish_response(&ctx.source_id, request_id, &response)
                                .await
                            {
                                error!(source_id = %ctx.source_id, error = %err, "failed to publish command response");
                            }
                            handler.after_response(&cmd).await;
                        }
                        None => {
                            warn!(source_id = %ctx.source_id, "command subscription closed, resubscribing");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(source_id = %ctx.source_id, "command task shutting down");
                    return;
                }
            }
        }

        if sleep_or_shutdown(&mut shutdown_rx).await {
            return;
        }
    }
}

async fn run_config_task(ctx: AppContext, listener: Arc<dyn ConfigChangeListener>) {
    let mut shutdown_rx = ctx.subscribe_shutdown();
    loop {
        let mut sub = match ctx.broker.subscribe_config_changes().await {
            Ok(sub) => sub,
            Err(err) => {
                warn!(source_id = %ctx.source_id, error = %err, "config subscription failed, retrying");
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
                        Some(event) => listener.on_config_changed(&event.section).await,
                        None => {
                            warn!(source_id = %ctx.source_id, "config subscription closed, resubscribing");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(source_id = %ctx.source_id, "config task shutting down");
                    return;
                }
            }
        }

        if sleep_or_shutdown(&mut shutdown_rx).await {
            return;
        }
    }
}

/// Sleeps `RESUBSCRIBE_DELAY`, racing shutdown. Returns `true` if shutdown
/// won the race (caller should stop looping).
async fn sleep_or_shutdown(shutdown_rx: &mut tokio::sync::broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => false,
        _ = shutdown_rx.recv() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sense_broker::{Broker, Command, FakeBroker, SensorReading, SourceMetadata};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        ticks: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Source for CountingSource {
        fn source_id(&self) -> &str {
            "system"
        }

        fn metadata(&self) -> SourceMetadata {
            SourceMetadata {
                source_id: "system".into(),
                name: "System".into(),
                description: "host metrics".into(),
                refresh_interval: 30,
                enabled: true,
            }
        }

        async fn poll(&self) -> anyhow::Result<Vec<SensorReading>> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(vec![SensorReading::new("cpu_percent", 12.5)])
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle_command(&self, cmd: &Command) -> anyhow::Result<CommandResponse> {
            if cmd.action == "boom" {
                anyhow::bail!("synthetic failure");
            }
            Ok(CommandResponse::ok(cmd.request_id))
        }
    }

    struct NoopConfigListener;
    #[async_trait]
    impl ConfigChangeListener for NoopConfigListener {}

    #[tokio::test]
    async fn poll_task_ticks_immediately_and_on_interval() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let ctx = AppContext::new(broker.clone(), "system");
        let ticks = Arc::new(AtomicU32::new(0));
        let source: Arc<dyn Source> = Arc::new(CountingSource {
            ticks: ticks.clone(),
        });

        let mut tasks = JoinSet::new();
        let handler: Arc<dyn CommandHandler> = Arc::new(EchoHandler);
        let config_listener: Arc<dyn ConfigChangeListener> = Arc::new(NoopConfigListener);
        spawn(
            &mut tasks,
            ctx.clone(),
            source,
            handler,
            config_listener,
            Duration::from_millis(20),
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        ctx.shutdown();
        while tasks.join_next().await.is_some() {}

        assert!(ticks.load(Ordering::SeqCst) >= 2);
        let status = broker.read_status("system").await.unwrap().unwrap();
        assert!(status.poll_count >= 2);
    }

    #[tokio::test]
    async fn command_task_replies_on_correlated_channel() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let ctx = AppContext::new(broker.clone(), "sensors");

        let mut tasks = JoinSet::new();
        let source: Arc<dyn Source> = Arc::new(CountingSource {
            ticks: Arc::new(AtomicU32::new(0)),
        });
        let handler: Arc<dyn CommandHandler> = Arc::new(EchoHandler);
        let config_listener: Arc<dyn ConfigChangeListener> = Arc::new(NoopConfigListener);
        spawn(
            &mut tasks,
            ctx.clone(),
            source,
            handler,
            config_listener,
            Duration::from_secs(3600),
        );

        // Give the command task a moment to subscribe before publishing.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cmd = Command::new("clear");
        let response = sense_broker::rpc::call(
            &*broker,
            "sensors",
            cmd,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(response.is_ok());

        ctx.shutdown();
        while tasks.join_next().await.is_some() {}
    }

    #[tokio::test]
    async fn failing_handler_yields_error_response() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let ctx = AppContext::new(broker.clone(), "sensors");

        let mut tasks = JoinSet::new();
        let source: Arc<dyn Source> = Arc::new(CountingSource {
            ticks: Arc::new(AtomicU32::new(0)),
        });
        let handler: Arc<dyn CommandHandler> = Arc::new(EchoHandler);
        let config_listener: Arc<dyn ConfigChangeListener> = Arc::new(NoopConfigListener);
        spawn(
            &mut tasks,
            ctx.clone(),
            source,
            handler,
            config_listener,
            Duration::from_secs(3600),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cmd = Command::new("boom");
        let response =
            sense_broker::rpc::call(&*broker, "sensors", cmd, Duration::from_secs(1))
                .await
                .unwrap();
        assert!(!response.is_ok());
        assert!(response.error.unwrap().contains("synthetic failure"));

        ctx.shutdown();
        while tasks.join_next().await.is_some() {}
    }
}
