// src/client.rs

//! The `Broker` trait: every key-space, pub/sub, and config operation a
//! Sense Pulse process needs, abstracted over a concrete transport so
//! callers can run against a live Redis deployment or an in-memory fake.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::channels;
use crate::errors::{Result, SenseError};
use crate::keys;
use crate::model::{
    Command, CommandResponse, ConfigChanged, ConfigSection, ReadingEnvelope, SensorReading,
    SourceMetadata, SourceStatus, StreamEnded,
};
use crate::subscription::Subscription;

/// Batch size used for every `SCAN` cursor walk.
pub const SCAN_BATCH: usize = 100;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Writes every reading for a source plus its status in a single atomic
    /// pipeline, each key carrying the reading TTL.
    async fn write_readings(&self, source_id: &str, readings: &[SensorReading]) -> Result<()>;

    async fn write_meta(&self, source_id: &str, meta: &SourceMetadata) -> Result<()>;

    async fn read_meta(&self, source_id: &str) -> Result<Option<SourceMetadata>>;

    async fn write_status(&self, status: &SourceStatus) -> Result<()>;

    async fn read_status(&self, source_id: &str) -> Result<Option<SourceStatus>>;

    /// Scans `status:*` and returns every status currently present.
    async fn scan_statuses(&self) -> Result<Vec<SourceStatus>>;

    /// Scans `source:{source_id}:*` and returns every reading currently present,
    /// keyed by sensor id.
    async fn read_source(&self, source_id: &str) -> Result<HashMap<String, ReadingEnvelope>>;

    async fn publish_data(&self, source_id: &str) -> Result<()>;

    async fn publish_command(&self, target: &str, cmd: &Command) -> Result<()>;

    async fn publish_response(&self, target: &str, request_id: Uuid, resp: &CommandResponse)
    -> Result<()>;

    async fn subscribe_commands(&self, target: &str) -> Result<Subscription<Command>>;

    async fn subscribe_response(
        &self,
        target: &str,
        request_id: Uuid,
    ) -> Result<Subscription<CommandResponse>>;

    async fn subscribe_config_changes(&self) -> Result<Subscription<ConfigChanged>>;

    async fn subscribe_stream_ended(&self) -> Result<Subscription<StreamEnded>>;

    async fn publish_stream_ended(&self, source_id: &str, reason: &str) -> Result<()>;

    async fn read_config(&self, section: &str) -> Result<Option<ConfigSection>>;

    async fn write_config(&self, section: &str, data: &ConfigSection) -> Result<()>;

    /// Writes `config:{section}` only if absent (`SET ... NX`). Returns
    /// whether the write happened.
    async fn seed_config(&self, section: &str, data: &ConfigSection) -> Result<bool>;

    async fn publish_config_changed(&self, section: &str) -> Result<()>;

    async fn write_scan(&self, scope: &str, data: &serde_json::Value) -> Result<()>;

    async fn read_scan(&self, scope: &str) -> Result<Option<serde_json::Value>>;
}

/// Connects to `url`, retrying with exponential backoff (base 1s, doubling,
/// capped at 30s) until `attempts` have been made. Shared by every binary's
/// boot sequence so a cold Redis instance doesn't fail the whole process.
pub async fn connect_with_backoff(
    url: &str,
    attempts: u32,
) -> Result<redis_backend::RedisBroker> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match redis_backend::RedisBroker::connect(url).await {
            Ok(broker) => return Ok(broker),
            Err(err) if attempt < attempts => {
                let backoff = Duration::from_secs(1 << (attempt - 1).min(4));
                tracing::warn!(attempt, ?backoff, error = %err, "broker connect failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

pub use redis_backend::RedisBroker;

mod redis_backend {
    use super::*;
    use redis::aio::ConnectionManager;
    use redis::{AsyncCommands, Client};
    use tokio::sync::mpsc;

    /// Production `Broker` backed by a live Redis (or Redis-compatible)
    /// deployment. Keyed operations run over a shared `ConnectionManager`
    /// (which reconnects transparently); every subscription opens its own
    /// sibling `PubSub` connection so a slow consumer never blocks keyed
    /// traffic on the same socket.
    pub struct RedisBroker {
        client: Client,
        conn: ConnectionManager,
    }

    impl RedisBroker {
        pub async fn connect(url: &str) -> Result<Self> {
            let client =
                Client::open(url).map_err(|e| SenseError::Connect(e.to_string()))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| SenseError::Connect(e.to_string()))?;
            Ok(Self { client, conn })
        }

        async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
            let mut conn = self.conn.clone();
            let mut cursor: u64 = 0;
            let mut keys = Vec::new();
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .cursor_arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| SenseError::Command(e.to_string()))?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok(keys)
        }

        /// Opens a dedicated pub/sub connection subscribed to `channel` and
        /// forwards each message, JSON-deserialized as `T`, into a bounded
        /// mpsc channel. The forwarding task exits (dropping the connection)
        /// as soon as the returned `Subscription` is dropped.
        async fn subscribe_typed<T>(&self, channel: &str) -> Result<Subscription<T>>
        where
            T: serde::de::DeserializeOwned + Send + 'static,
        {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| SenseError::Subscription(e.to_string()))?;
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e| SenseError::Subscription(e.to_string()))?;

            let (tx, rx) = mpsc::channel(32);
            let channel_owned = channel.to_string();
            tokio::spawn(async move {
                use futures::StreamExt;
                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(channel = %channel_owned, error = %e, "non-string pubsub payload");
                            continue;
                        }
                    };
                    let parsed: T = match serde_json::from_str(&payload) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(channel = %channel_owned, error = %e, "malformed pubsub payload");
                            continue;
                        }
                    };
                    if tx.send(parsed).await.is_err() {
                        break;
                    }
                }
            });

            Ok(Subscription::new(rx))
        }

        async fn publish_json<T: serde::Serialize + Sync>(
            &self,
            channel: &str,
            value: &T,
        ) -> Result<()> {
            let payload = serde_json::to_string(value)?;
            let mut conn = self.conn.clone();
            conn.publish::<_, _, ()>(channel, payload)
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            Ok(())
        }
    }

    #[async_trait]
    impl Broker for RedisBroker {
        async fn write_readings(&self, source_id: &str, readings: &[SensorReading]) -> Result<()> {
            let mut conn = self.conn.clone();
            let mut pipe = redis::pipe();
            pipe.atomic();
            for reading in readings {
                let envelope = ReadingEnvelope::from(reading);
                let payload = serde_json::to_string(&envelope)?;
                pipe.set_ex(
                    keys::reading_key(source_id, &reading.sensor_id),
                    payload,
                    keys::READING_TTL.as_secs(),
                );
            }
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            Ok(())
        }

        async fn write_meta(&self, source_id: &str, meta: &SourceMetadata) -> Result<()> {
            let payload = serde_json::to_string(meta)?;
            let mut conn = self.conn.clone();
            conn.set::<_, _, ()>(keys::meta_key(source_id), payload)
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            Ok(())
        }

        async fn read_meta(&self, source_id: &str) -> Result<Option<SourceMetadata>> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn
                .get(keys::meta_key(source_id))
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            raw.map(|s| serde_json::from_str(&s).map_err(SenseError::from))
                .transpose()
        }

        async fn write_status(&self, status: &SourceStatus) -> Result<()> {
            let payload = serde_json::to_string(status)?;
            let mut conn = self.conn.clone();
            conn.set_ex::<_, _, ()>(
                keys::status_key(&status.source_id),
                payload,
                keys::STATUS_TTL.as_secs(),
            )
            .await
            .map_err(|e| SenseError::Command(e.to_string()))?;
            Ok(())
        }

        async fn read_status(&self, source_id: &str) -> Result<Option<SourceStatus>> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn
                .get(keys::status_key(source_id))
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            raw.map(|s| serde_json::from_str(&s).map_err(SenseError::from))
                .transpose()
        }

        async fn scan_statuses(&self) -> Result<Vec<SourceStatus>> {
            let keys = self.scan(keys::ALL_STATUS_PATTERN).await?;
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            let mut conn = self.conn.clone();
            let raws: Vec<Option<String>> = conn
                .mget(&keys)
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            raws.into_iter()
                .flatten()
                .map(|s| serde_json::from_str(&s).map_err(SenseError::from))
                .collect()
        }

        async fn read_source(&self, source_id: &str) -> Result<HashMap<String, ReadingEnvelope>> {
            let pattern = keys::source_scan_pattern(source_id);
            let found = self.scan(&pattern).await?;
            if found.is_empty() {
                return Ok(HashMap::new());
            }
            let mut conn = self.conn.clone();
            let raws: Vec<Option<String>> = conn
                .mget(&found)
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            let mut out = HashMap::with_capacity(found.len());
            for (key, raw) in found.into_iter().zip(raws) {
                let Some(raw) = raw else { continue };
                let Some((_, sensor_id)) = keys::parse_reading_key(&key) else {
                    continue;
                };
                let envelope: ReadingEnvelope = serde_json::from_str(&raw)?;
                out.insert(sensor_id.to_string(), envelope);
            }
            Ok(out)
        }

        async fn publish_data(&self, source_id: &str) -> Result<()> {
            let notification = crate::model::DataNotification {
                source_id: source_id.to_string(),
                timestamp: crate::model::now_ts(),
            };
            self.publish_json(&channels::data_channel(source_id), &notification)
                .await
        }

        async fn publish_command(&self, target: &str, cmd: &Command) -> Result<()> {
            self.publish_json(&channels::cmd_channel(target), cmd).await
        }

        async fn publish_response(
            &self,
            target: &str,
            request_id: Uuid,
            resp: &CommandResponse,
        ) -> Result<()> {
            self.publish_json(&channels::cmd_response_channel(target, request_id), resp)
                .await
        }

        async fn subscribe_commands(&self, target: &str) -> Result<Subscription<Command>> {
            self.subscribe_typed(&channels::cmd_channel(target)).await
        }

        async fn subscribe_response(
            &self,
            target: &str,
            request_id: Uuid,
        ) -> Result<Subscription<CommandResponse>> {
            self.subscribe_typed(&channels::cmd_response_channel(target, request_id))
                .await
        }

        async fn subscribe_config_changes(&self) -> Result<Subscription<ConfigChanged>> {
            self.subscribe_typed(channels::CONFIG_CHANGED_CHANNEL).await
        }

        async fn subscribe_stream_ended(&self) -> Result<Subscription<StreamEnded>> {
            self.subscribe_typed(channels::STREAM_ENDED_CHANNEL).await
        }

        async fn publish_stream_ended(&self, source_id: &str, reason: &str) -> Result<()> {
            let payload = StreamEnded {
                source_id: source_id.to_string(),
                reason: reason.to_string(),
                timestamp: crate::model::now_ts(),
            };
            self.publish_json(channels::STREAM_ENDED_CHANNEL, &payload)
                .await
        }

        async fn read_config(&self, section: &str) -> Result<Option<ConfigSection>> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn
                .get(keys::config_key(section))
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            raw.map(|s| serde_json::from_str(&s).map_err(SenseError::from))
                .transpose()
        }

        async fn write_config(&self, section: &str, data: &ConfigSection) -> Result<()> {
            let payload = serde_json::to_string(data)?;
            let mut conn = self.conn.clone();
            conn.set::<_, _, ()>(keys::config_key(section), payload)
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            Ok(())
        }

        async fn seed_config(&self, section: &str, data: &ConfigSection) -> Result<bool> {
            let payload = serde_json::to_string(data)?;
            let mut conn = self.conn.clone();
            let result: Option<String> = redis::cmd("SET")
                .arg(keys::config_key(section))
                .arg(payload)
                .arg("NX")
                .query_async(&mut conn)
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            Ok(result.is_some())
        }

        async fn publish_config_changed(&self, section: &str) -> Result<()> {
            let payload = ConfigChanged {
                section: section.to_string(),
                timestamp: crate::model::now_ts(),
            };
            self.publish_json(channels::CONFIG_CHANGED_CHANNEL, &payload)
                .await
        }

        async fn write_scan(&self, scope: &str, data: &serde_json::Value) -> Result<()> {
            let payload = serde_json::to_string(data)?;
            let mut conn = self.conn.clone();
            conn.set_ex::<_, _, ()>(keys::scan_key(scope), payload, keys::SCAN_TTL.as_secs())
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            Ok(())
        }

        async fn read_scan(&self, scope: &str) -> Result<Option<serde_json::Value>> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn
                .get(keys::scan_key(scope))
                .await
                .map_err(|e| SenseError::Command(e.to_string()))?;
            raw.map(|s| serde_json::from_str(&s).map_err(SenseError::from))
                .transpose()
        }
    }
}
