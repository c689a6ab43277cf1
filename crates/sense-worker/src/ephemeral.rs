// src/ephemeral.rs

//! The ephemeral worker base (C2): connect, poll once, record the outcome,
//! exit. No retry inside one invocation — the orchestrator's scheduler is
//! what re-triggers a failed source at the next tick.

use sense_broker::{SourceStatus, now_ts};
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::hooks::Source;

/// Runs one ephemeral pass for `source` against `ctx`. Never returns an
/// error: every failure is recorded as a `SourceStatus` write instead of
/// propagated, since there is no caller left to hand it to by the time the
/// process exits.
pub async fn run(ctx: &AppContext, source: &dyn Source) {
    let t0 = now_ts();
    match run_steps(ctx, source, t0).await {
        Ok(()) => {
            info!(source_id = %ctx.source_id, "ephemeral poll succeeded");
        }
        Err(err) => {
            warn!(source_id = %ctx.source_id, error = %err, "ephemeral poll failed");
            let status = SourceStatus {
                source_id: ctx.source_id.clone(),
                last_poll: Some(t0),
                last_success: None,
                last_error: Some(err.to_string()),
                poll_count: 0,
                error_count: 1,
            };
            if let Err(write_err) = ctx.broker.write_status(&status).await {
                error!(
                    source_id = %ctx.source_id,
                    error = %write_err,
                    "failed to record ephemeral worker failure status"
                );
            }
        }
    }
}

async fn run_steps(ctx: &AppContext, source: &dyn Source, t0: f64) -> anyhow::Result<()> {
    let readings = source.poll().await?;
    ctx.broker
        .write_readings(&ctx.source_id, &readings)
        .await?;
    ctx.broker
        .write_meta(&ctx.source_id, &source.metadata())
        .await?;
    let status = SourceStatus {
        source_id: ctx.source_id.clone(),
        last_poll: Some(t0),
        last_success: Some(now_ts()),
        last_error: None,
        poll_count: 1,
        error_count: 0,
    };
    ctx.broker.write_status(&status).await?;
    ctx.broker.publish_data(&ctx.source_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sense_broker::{Broker, FakeBroker, ReadingValue, SensorReading};
    use std::sync::Arc;

    struct MockSource {
        should_fail: bool,
    }

    #[async_trait]
    impl Source for MockSource {
        fn source_id(&self) -> &str {
            "weather"
        }

        fn metadata(&self) -> sense_broker::SourceMetadata {
            sense_broker::SourceMetadata {
                source_id: "weather".into(),
                name: "Weather".into(),
                description: "Outdoor temperature and humidity".into(),
                refresh_interval: 600,
                enabled: true,
            }
        }

        async fn poll(&self) -> anyhow::Result<Vec<SensorReading>> {
            if self.should_fail {
                anyhow::bail!("upstream API unreachable");
            }
            Ok(vec![
                SensorReading::new("temp", 24.3).with_unit("C"),
                SensorReading::new("humidity", 72i64).with_unit("%"),
            ])
        }
    }

    #[tokio::test]
    async fn ephemeral_success_writes_readings_meta_status_and_notifies() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let ctx = AppContext::new(broker.clone(), "weather");
        let source = MockSource { should_fail: false };

        run(&ctx, &source).await;

        let readings = broker.read_source("weather").await.unwrap();
        assert_eq!(readings.get("temp").unwrap().value, ReadingValue::Float(24.3));
        assert_eq!(readings.get("temp").unwrap().unit.as_deref(), Some("C"));
        assert_eq!(
            readings.get("humidity").unwrap().value,
            ReadingValue::Int(72)
        );

        let meta = broker.read_meta("weather").await.unwrap().unwrap();
        assert_eq!(meta.name, "Weather");

        let status = broker.read_status("weather").await.unwrap().unwrap();
        assert_eq!(status.poll_count, 1);
        assert_eq!(status.error_count, 0);
        assert!(status.last_success.is_some());
    }

    #[tokio::test]
    async fn ephemeral_failure_records_error_status_only() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let ctx = AppContext::new(broker.clone(), "weather");
        let source = MockSource { should_fail: true };

        run(&ctx, &source).await;

        assert!(broker.read_source("weather").await.unwrap().is_empty());
        let status = broker.read_status("weather").await.unwrap().unwrap();
        assert_eq!(status.error_count, 1);
        assert_eq!(status.poll_count, 0);
        assert!(status.last_error.unwrap().contains("upstream API unreachable"));
    }
}
