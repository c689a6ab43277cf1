// src/weather.rs

//! Ephemeral weather source, grounded on
//! `original_source/services/source-weather/weather/source.py`. The
//! original parses wttr.in's response into 26 readings (11 current-
//! condition fields plus a 3-day/5-field forecast); spec.md §1 scopes that
//! per-source parsing out of this repository's core, so this is a thin
//! stand-in: it makes the same HTTP call and config lookup, but only
//! carries the two fields (`weather_temp`, `weather_humidity`) needed to
//! prove the ephemeral pipeline (poll -> write -> notify) end to end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sense_broker::{Broker, SensorReading, SourceMetadata};
use sense_worker::Source;
use tracing::{info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WeatherSource {
    broker: Arc<dyn Broker>,
    client: reqwest::Client,
}

impl WeatherSource {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { broker, client }
    }
}

#[async_trait]
impl Source for WeatherSource {
    fn source_id(&self) -> &str {
        "weather"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            source_id: "weather".into(),
            name: "Weather".into(),
            description: "Current weather conditions from wttr.in".into(),
            refresh_interval: 300,
            enabled: true,
        }
    }

    async fn poll(&self) -> anyhow::Result<Vec<SensorReading>> {
        let config = self.broker.read_config("weather").await?.unwrap_or_default();
        let location = config
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if location.is_empty() {
            warn!("no weather location configured");
            return Ok(Vec::new());
        }

        let url = format!("https://wttr.in/{location}?format=j1");
        info!(%location, "fetching weather");
        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "weather API request failed");
                return Ok(Vec::new());
            }
        };

        let data: serde_json::Value = match response.error_for_status() {
            Ok(resp) => match resp.json().await {
                Ok(data) => data,
                Err(err) => {
                    warn!(error = %err, "weather API returned unparseable JSON");
                    return Ok(Vec::new());
                }
            },
            Err(err) => {
                warn!(error = %err, "weather API HTTP error");
                return Ok(Vec::new());
            }
        };

        Ok(parse_current_condition(&data))
    }
}

fn parse_current_condition(data: &serde_json::Value) -> Vec<SensorReading> {
    let current = &data["current_condition"][0];
    if current.is_null() {
        return Vec::new();
    }

    let mut readings = Vec::new();
    if let Some(temp) = current["temp_C"].as_str().and_then(|s| s.parse::<f64>().ok()) {
        readings.push(SensorReading::new("weather_temp", temp).with_unit("C"));
    }
    if let Some(humidity) = current["humidity"]
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
    {
        readings.push(SensorReading::new("weather_humidity", humidity).with_unit("%"));
    }
    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_broker::ReadingValue;

    #[test]
    fn parses_temp_and_humidity_from_current_condition() {
        let data = serde_json::json!({
            "current_condition": [{"temp_C": "24", "humidity": "72"}]
        });
        let readings = parse_current_condition(&data);
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].value, ReadingValue::Float(24.0));
        assert_eq!(readings[1].value, ReadingValue::Int(72));
    }

    #[test]
    fn missing_current_condition_yields_no_readings() {
        let data = serde_json::json!({});
        assert!(parse_current_condition(&data).is_empty());
    }

    #[tokio::test]
    async fn empty_location_returns_no_readings_without_a_request() {
        let broker: Arc<dyn Broker> = Arc::new(sense_broker::FakeBroker::new());
        let source = WeatherSource::new(broker);
        let readings = source.poll().await.unwrap();
        assert!(readings.is_empty());
    }
}
