// src/source.rs

//! The `Source` side of the camera worker (spec.md §4.4.5): the six
//! `stream_*` readings derived from the `StreamManager`'s current status,
//! published on the persistent worker base's regular poll cadence. Grounded
//! on `original_source/services/source-camera/camera/main.py`'s
//! `_write_stream_readings` — all six keys are always present, with zero
//! values (`""`/`0`) standing in for "no value yet" rather than omission.

use std::sync::Arc;

use async_trait::async_trait;
use sense_broker::{SensorReading, SourceMetadata};
use sense_worker::Source;

use crate::manager::StreamManager;

pub struct CameraSource {
    source_id: String,
    manager: Arc<StreamManager>,
    refresh_interval: u32,
}

impl CameraSource {
    pub fn new(source_id: impl Into<String>, manager: Arc<StreamManager>, refresh_interval: u32) -> Self {
        Self {
            source_id: source_id.into(),
            manager,
            refresh_interval,
        }
    }
}

#[async_trait]
impl Source for CameraSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            source_id: self.source_id.clone(),
            name: "Network Camera".to_string(),
            description: "RTSP network camera HLS stream".to_string(),
            refresh_interval: self.refresh_interval,
            enabled: true,
        }
    }

    async fn poll(&self) -> anyhow::Result<Vec<SensorReading>> {
        let status = self.manager.status().await;
        Ok(vec![
            SensorReading::new("stream_status", status.state.as_str()),
            SensorReading::new("stream_connected", status.connected),
            SensorReading::new("stream_error", status.error.unwrap_or_default()),
            SensorReading::new("stream_resolution", status.resolution.unwrap_or_default()),
            SensorReading::new("stream_fps", status.fps.unwrap_or(0) as i64).with_unit("fps"),
            SensorReading::new("stream_uptime", status.uptime_secs).with_unit("seconds"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HlsSettings;

    #[tokio::test]
    async fn poll_reports_stopped_state_with_zeroed_optional_fields() {
        let manager = Arc::new(StreamManager::new(
            "rtsp://127.0.0.1/stream1",
            "tcp",
            std::env::temp_dir().join("sense-camera-source-test"),
            HlsSettings::default(),
            10,
            5.0,
        ));
        let source = CameraSource::new("network_camera", manager, 5);
        let readings = source.poll().await.unwrap();
        assert_eq!(readings.len(), 6);
        let by_id: std::collections::HashMap<_, _> =
            readings.iter().map(|r| (r.sensor_id.as_str(), r)).collect();
        assert_eq!(
            by_id["stream_status"].value,
            sense_broker::ReadingValue::Text("stopped".to_string())
        );
        assert_eq!(
            by_id["stream_connected"].value,
            sense_broker::ReadingValue::Bool(false)
        );
        assert_eq!(
            by_id["stream_error"].value,
            sense_broker::ReadingValue::Text(String::new())
        );
        assert_eq!(
            by_id["stream_fps"].value,
            sense_broker::ReadingValue::Int(0)
        );
    }
}
