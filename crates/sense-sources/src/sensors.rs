// src/sensors.rs

//! The Sense HAT sensor-polling half of the `sensors` persistent worker,
//! grounded on
//! `original_source/services/source-sensehat/sensehat/source.py`. Real
//! Sense HAT hardware access (BLE/I2C) is out of spec.md §1's scope for
//! this repository, so `SenseHatSource` always reports unavailable
//! hardware, matching the original's own graceful fallback when the
//! `sense_hat` module can't be imported: zero readings, a single warning,
//! and a worker that otherwise keeps running (spec.md §7 error kind 7).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sense_broker::{SensorReading, SourceMetadata};
use sense_worker::Source;
use tracing::warn;

pub struct SenseHatSource {
    warned: AtomicBool,
}

impl Default for SenseHatSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SenseHatSource {
    pub fn new() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Source for SenseHatSource {
    fn source_id(&self) -> &str {
        "sensors"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            source_id: "sensors".into(),
            name: "Sense HAT Sensors".into(),
            description: "Onboard temperature, humidity, and pressure sensors".into(),
            refresh_interval: 30,
            enabled: true,
        }
    }

    async fn poll(&self) -> anyhow::Result<Vec<SensorReading>> {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!("sense_hat hardware not available -- sensor source unavailable");
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_hardware_yields_no_readings() {
        let source = SenseHatSource::new();
        assert!(source.poll().await.unwrap().is_empty());
        // second poll stays quiet (warns once) and still returns nothing
        assert!(source.poll().await.unwrap().is_empty());
    }
}
