// src/state.rs

//! The five-state stream FSM (spec.md §4.4.1) and the status snapshot
//! surfaced to commands and readings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Stopped,
    Starting,
    Streaming,
    Reconnecting,
    Error,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Stopped => "stopped",
            StreamState::Starting => "starting",
            StreamState::Streaming => "streaming",
            StreamState::Reconnecting => "reconnecting",
            StreamState::Error => "error",
        }
    }
}

/// A point-in-time snapshot of the stream, returned by `start`/`restart` and
/// surfaced in readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: StreamState,
    pub connected: bool,
    pub error: Option<String>,
    pub resolution: Option<String>,
    pub fps: Option<u32>,
    pub uptime_secs: f64,
}
