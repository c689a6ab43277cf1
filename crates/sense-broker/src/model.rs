// src/model.rs

//! Wire types shared by every process that talks to the broker.
//!
//! These mirror the entities in the data model one-to-one: a type here is
//! never mutated in place, only constructed fresh and written wholesale.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Seconds since the Unix epoch, as carried on the wire.
pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The scalar union a reading's value may hold. Serialized untagged so the
/// wire shape is a bare JSON scalar, matching `{"value": <scalar>, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<i64> for ReadingValue {
    fn from(v: i64) -> Self {
        ReadingValue::Int(v)
    }
}
impl From<f64> for ReadingValue {
    fn from(v: f64) -> Self {
        ReadingValue::Float(v)
    }
}
impl From<bool> for ReadingValue {
    fn from(v: bool) -> Self {
        ReadingValue::Bool(v)
    }
}
impl From<String> for ReadingValue {
    fn from(v: String) -> Self {
        ReadingValue::Text(v)
    }
}
impl From<&str> for ReadingValue {
    fn from(v: &str) -> Self {
        ReadingValue::Text(v.to_string())
    }
}

/// A single scalar observation, produced by a source on each poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    pub value: ReadingValue,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "now_ts")]
    pub timestamp: f64,
}

impl SensorReading {
    pub fn new(sensor_id: impl Into<String>, value: impl Into<ReadingValue>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            value: value.into(),
            unit: None,
            timestamp: now_ts(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// The stored envelope for one reading key (`{value, unit, timestamp}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingEnvelope {
    pub value: ReadingValue,
    pub unit: Option<String>,
    pub timestamp: f64,
}

impl From<&SensorReading> for ReadingEnvelope {
    fn from(r: &SensorReading) -> Self {
        Self {
            value: r.value.clone(),
            unit: r.unit.clone(),
            timestamp: r.timestamp,
        }
    }
}

/// Describes a source's identity. No TTL; overwritten by the source each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_id: String,
    pub name: String,
    pub description: String,
    pub refresh_interval: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Health snapshot of a source. TTL 120s; absence means "not reporting".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceStatus {
    pub source_id: String,
    #[serde(default)]
    pub last_poll: Option<f64>,
    #[serde(default)]
    pub last_success: Option<f64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub poll_count: u64,
    #[serde(default)]
    pub error_count: u64,
}

impl SourceStatus {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Default::default()
        }
    }
}

/// An RPC request published on `cmd:{target}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default = "now_ts")]
    pub timestamp: f64,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            request_id: Uuid::new_v4(),
            params: HashMap::new(),
            timestamp: now_ts(),
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }
}

/// The status of a `CommandResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// An RPC reply published on `cmd:{target}:response:{request_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub request_id: Uuid,
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(request_id: Uuid) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Ok,
            data: HashMap::new(),
            error: None,
        }
    }

    pub fn ok_with(request_id: Uuid, data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Ok,
            data,
            error: None,
        }
    }

    pub fn error(request_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Error,
            data: HashMap::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// A named bag of key/value settings for one subsystem, stored at `config:{section}`.
pub type ConfigSection = HashMap<String, serde_json::Value>;

/// Payload of a `data:{source_id}` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNotification {
    pub source_id: String,
    pub timestamp: f64,
}

/// Payload of a `config:changed` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChanged {
    pub section: String,
    pub timestamp: f64,
}

/// Payload of a `stream:ended` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnded {
    pub source_id: String,
    pub reason: String,
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_value_serializes_as_bare_scalar() {
        let r = SensorReading::new("temp", 24.3).with_unit("C");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["value"], 24.3);
        assert_eq!(json["unit"], "C");
    }

    #[test]
    fn status_last_success_ge_last_poll_invariant_holds_by_construction() {
        let mut status = SourceStatus::new("weather");
        status.last_poll = Some(100.0);
        status.last_success = Some(100.5);
        assert!(status.last_success.unwrap() >= status.last_poll.unwrap());
    }

    #[test]
    fn command_response_is_ok_matches_status() {
        let id = Uuid::new_v4();
        assert!(CommandResponse::ok(id).is_ok());
        assert!(!CommandResponse::error(id, "boom").is_ok());
    }
}
