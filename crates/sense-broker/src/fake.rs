// src/fake.rs

//! An in-memory `Broker` double, modeled on the key/value store plus
//! fan-out channel registry every test in the workspace runs against.
//! No TTL eviction: nothing here relies on keys expiring on their own,
//! since overdue/staleness logic always compares timestamps carried in
//! the stored payload, not storage-layer expiry.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::channels;
use crate::client::Broker;
use crate::errors::{Result, SenseError};
use crate::keys;
use crate::model::{
    Command, CommandResponse, ConfigChanged, ConfigSection, DataNotification, ReadingEnvelope,
    SensorReading, SourceMetadata, SourceStatus, StreamEnded, now_ts,
};
use crate::subscription::Subscription;

const CHANNEL_CAPACITY: usize = 64;

/// In-memory stand-in for a Redis deployment, backed by a `DashMap` key/value
/// store and a registry of broadcast channels, one per pub/sub channel name —
/// the same shape as a `PubSubManager`, generalized to arbitrary channels.
#[derive(Default)]
pub struct FakeBroker {
    store: DashMap<String, String>,
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn publish_json<T: serde::Serialize>(&self, channel: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        // No receivers is not an error: matches Redis PUBLISH semantics.
        let _ = self.sender_for(channel).send(payload);
        Ok(())
    }

    fn subscribe_typed<T>(&self, channel: &str) -> Subscription<T>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let mut broadcast_rx = self.sender_for(channel).subscribe();
        let (tx, rx) = mpsc::channel(32);
        let channel_owned = channel.to_string();
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(payload) => match serde_json::from_str::<T>(&payload) {
                        Ok(parsed) => {
                            if tx.send(parsed).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(channel = %channel_owned, error = %e, "malformed fake pubsub payload");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::new(rx)
    }

    fn scan(&self, matches: impl Fn(&str) -> bool) -> Vec<(String, String)> {
        self.store
            .iter()
            .filter(|entry| matches(entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn write_readings(&self, source_id: &str, readings: &[SensorReading]) -> Result<()> {
        for reading in readings {
            let envelope = ReadingEnvelope::from(reading);
            let payload = serde_json::to_string(&envelope)?;
            self.store
                .insert(keys::reading_key(source_id, &reading.sensor_id), payload);
        }
        Ok(())
    }

    async fn write_meta(&self, source_id: &str, meta: &SourceMetadata) -> Result<()> {
        let payload = serde_json::to_string(meta)?;
        self.store.insert(keys::meta_key(source_id), payload);
        Ok(())
    }

    async fn read_meta(&self, source_id: &str) -> Result<Option<SourceMetadata>> {
        self.store
            .get(&keys::meta_key(source_id))
            .map(|v| serde_json::from_str(v.value()).map_err(SenseError::from))
            .transpose()
    }

    async fn write_status(&self, status: &SourceStatus) -> Result<()> {
        let payload = serde_json::to_string(status)?;
        self.store
            .insert(keys::status_key(&status.source_id), payload);
        Ok(())
    }

    async fn read_status(&self, source_id: &str) -> Result<Option<SourceStatus>> {
        self.store
            .get(&keys::status_key(source_id))
            .map(|v| serde_json::from_str(v.value()).map_err(SenseError::from))
            .transpose()
    }

    async fn scan_statuses(&self) -> Result<Vec<SourceStatus>> {
        self.scan(|k| k.starts_with("status:"))
            .into_iter()
            .map(|(_, v)| serde_json::from_str(&v).map_err(SenseError::from))
            .collect()
    }

    async fn read_source(&self, source_id: &str) -> Result<HashMap<String, ReadingEnvelope>> {
        let prefix = format!("source:{source_id}:");
        let mut out = HashMap::new();
        for (key, raw) in self.scan(|k| k.starts_with(&prefix)) {
            let Some((_, sensor_id)) = keys::parse_reading_key(&key) else {
                continue;
            };
            out.insert(sensor_id.to_string(), serde_json::from_str(&raw)?);
        }
        Ok(out)
    }

    async fn publish_data(&self, source_id: &str) -> Result<()> {
        let notification = DataNotification {
            source_id: source_id.to_string(),
            timestamp: now_ts(),
        };
        self.publish_json(&channels::data_channel(source_id), &notification)
    }

    async fn publish_command(&self, target: &str, cmd: &Command) -> Result<()> {
        self.publish_json(&channels::cmd_channel(target), cmd)
    }

    async fn publish_response(
        &self,
        target: &str,
        request_id: Uuid,
        resp: &CommandResponse,
    ) -> Result<()> {
        self.publish_json(&channels::cmd_response_channel(target, request_id), resp)
    }

    async fn subscribe_commands(&self, target: &str) -> Result<Subscription<Command>> {
        Ok(self.subscribe_typed(&channels::cmd_channel(target)))
    }

    async fn subscribe_response(
        &self,
        target: &str,
        request_id: Uuid,
    ) -> Result<Subscription<CommandResponse>> {
        Ok(self.subscribe_typed(&channels::cmd_response_channel(target, request_id)))
    }

    async fn subscribe_config_changes(&self) -> Result<Subscription<ConfigChanged>> {
        Ok(self.subscribe_typed(channels::CONFIG_CHANGED_CHANNEL))
    }

    async fn subscribe_stream_ended(&self) -> Result<Subscription<StreamEnded>> {
        Ok(self.subscribe_typed(channels::STREAM_ENDED_CHANNEL))
    }

    async fn publish_stream_ended(&self, source_id: &str, reason: &str) -> Result<()> {
        let payload = StreamEnded {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
            timestamp: now_ts(),
        };
        self.publish_json(channels::STREAM_ENDED_CHANNEL, &payload)
    }

    async fn read_config(&self, section: &str) -> Result<Option<ConfigSection>> {
        self.store
            .get(&keys::config_key(section))
            .map(|v| serde_json::from_str(v.value()).map_err(SenseError::from))
            .transpose()
    }

    async fn write_config(&self, section: &str, data: &ConfigSection) -> Result<()> {
        let payload = serde_json::to_string(data)?;
        self.store.insert(keys::config_key(section), payload);
        Ok(())
    }

    async fn seed_config(&self, section: &str, data: &ConfigSection) -> Result<bool> {
        let key = keys::config_key(section);
        if self.store.contains_key(&key) {
            return Ok(false);
        }
        let payload = serde_json::to_string(data)?;
        // entry API keeps this atomic under concurrent seeders.
        match self.store.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(payload);
                Ok(true)
            }
        }
    }

    async fn publish_config_changed(&self, section: &str) -> Result<()> {
        let payload = ConfigChanged {
            section: section.to_string(),
            timestamp: now_ts(),
        };
        self.publish_json(channels::CONFIG_CHANGED_CHANNEL, &payload)
    }

    async fn write_scan(&self, scope: &str, data: &serde_json::Value) -> Result<()> {
        let payload = serde_json::to_string(data)?;
        self.store.insert(keys::scan_key(scope), payload);
        Ok(())
    }

    async fn read_scan(&self, scope: &str) -> Result<Option<serde_json::Value>> {
        self.store
            .get(&keys::scan_key(scope))
            .map(|v| serde_json::from_str(v.value()).map_err(SenseError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_status_round_trips() {
        let broker = FakeBroker::new();
        let status = SourceStatus::new("weather");
        broker.write_status(&status).await.unwrap();
        let read = broker.read_status("weather").await.unwrap().unwrap();
        assert_eq!(read.source_id, "weather");
    }

    #[tokio::test]
    async fn seed_config_is_write_once() {
        let broker = FakeBroker::new();
        let mut data = ConfigSection::new();
        data.insert("interval".into(), serde_json::json!(30));
        assert!(broker.seed_config("schedule", &data).await.unwrap());
        let mut other = ConfigSection::new();
        other.insert("interval".into(), serde_json::json!(99));
        assert!(!broker.seed_config("schedule", &other).await.unwrap());
        let stored = broker.read_config("schedule").await.unwrap().unwrap();
        assert_eq!(stored.get("interval").unwrap(), &serde_json::json!(30));
    }

    #[tokio::test]
    async fn subscribe_commands_receives_published_command() {
        let broker = FakeBroker::new();
        let mut sub = broker.subscribe_commands("orchestrator").await.unwrap();
        let cmd = Command::new("start_camera");
        broker.publish_command("orchestrator", &cmd).await.unwrap();
        let received = sub.recv().await.unwrap();
        assert_eq!(received.action, "start_camera");
    }

    #[tokio::test]
    async fn read_source_collects_every_sensor_for_a_source() {
        let broker = FakeBroker::new();
        broker
            .write_readings(
                "weather",
                &[
                    SensorReading::new("temp", 21.5),
                    SensorReading::new("humidity", 55.0),
                ],
            )
            .await
            .unwrap();
        let readings = broker.read_source("weather").await.unwrap();
        assert_eq!(readings.len(), 2);
        assert!(readings.contains_key("temp"));
        assert!(readings.contains_key("humidity"));
    }
}
