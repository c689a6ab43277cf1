// src/config_seeder.rs

//! Seeds `config:*` sections from environment variables on first boot,
//! mirroring
//! `original_source/services/orchestrator/orchestrator/config_seeder.py`
//! and the env-parsing helpers in
//! `original_source/services/common/sense_common/config.py`.

use std::collections::HashMap;

use sense_broker::{Broker, ConfigSection, SenseError};
use serde_json::json;
use tracing::{debug, info};

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_int(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_float(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn env_json(key: &str, default: serde_json::Value) -> serde_json::Value {
    std::env::var(key)
        .ok()
        .and_then(|v| serde_json::from_str(&v).ok())
        .unwrap_or(default)
}

fn section(pairs: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> ConfigSection {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Builds the `section -> data` map from environment variables. Only
/// sections with at least one relevant env var set are included.
pub fn build_config_map() -> HashMap<String, ConfigSection> {
    let mut configs = HashMap::new();

    let pihole_host = env_str("PIHOLE_HOST");
    let pihole_password = env_str("PIHOLE_PASSWORD");
    if pihole_host.is_some() || pihole_password.is_some() {
        configs.insert(
            "pihole".to_string(),
            section([
                ("host", json!(pihole_host.unwrap_or_default())),
                ("password", json!(pihole_password.unwrap_or_default())),
            ]),
        );
    }

    if let Some(location) = env_str("WEATHER_LOCATION") {
        configs.insert("weather".to_string(), section([("location", json!(location))]));
    }

    let aranet4_sensors = env_json("ARANET4_SENSORS", json!([]));
    let aranet4_timeout = env_int("ARANET4_TIMEOUT", 10);
    let aranet4_sensors_nonempty = matches!(&aranet4_sensors, serde_json::Value::Array(a) if !a.is_empty());
    if aranet4_sensors_nonempty || env_str("ARANET4_SENSORS").is_some() {
        configs.insert(
            "aranet4".to_string(),
            section([("sensors", aranet4_sensors), ("timeout", json!(aranet4_timeout))]),
        );
    }

    let camera_config = env_json("CAMERA_CONFIG", json!([]));
    let camera_config_nonempty = matches!(&camera_config, serde_json::Value::Array(a) if !a.is_empty());
    if camera_config_nonempty || env_str("CAMERA_CONFIG").is_some() {
        configs.insert("camera".to_string(), section([("cameras", camera_config)]));
    }

    let display_rotation = env_int("DISPLAY_ROTATION", 0);
    let scroll_speed = env_float("SCROLL_SPEED", 0.08);
    let icon_duration = env_float("ICON_DURATION", 1.5);
    if env_str("DISPLAY_ROTATION").is_some()
        || env_str("SCROLL_SPEED").is_some()
        || env_str("ICON_DURATION").is_some()
    {
        configs.insert(
            "display".to_string(),
            section([
                ("rotation", json!(display_rotation)),
                ("scroll_speed", json!(scroll_speed)),
                ("icon_duration", json!(icon_duration)),
            ]),
        );
    }

    let sleep_start = env_int("SLEEP_START", 23);
    let sleep_end = env_int("SLEEP_END", 7);
    let disable_pi_leds = env_bool("DISABLE_PI_LEDS", false);
    if env_str("SLEEP_START").is_some()
        || env_str("SLEEP_END").is_some()
        || env_str("DISABLE_PI_LEDS").is_some()
    {
        configs.insert(
            "sleep".to_string(),
            section([
                ("start_hour", json!(sleep_start)),
                ("end_hour", json!(sleep_end)),
                ("disable_pi_leds", json!(disable_pi_leds)),
            ]),
        );
    }

    let mut schedule = ConfigSection::new();
    for (source, default) in [
        ("tailscale", 30),
        ("pihole", 30),
        ("system", 30),
        ("aranet4", 300),
        ("weather", 600),
    ] {
        let env_key = format!("SCHEDULE_{}", source.to_uppercase());
        schedule.insert(source.to_string(), json!(env_int(&env_key, default)));
    }
    configs.insert("schedule".to_string(), schedule);

    let auth_enabled = env_bool("AUTH_ENABLED", true);
    let auth_username = env_str("AUTH_USERNAME");
    let auth_password_hash = env_str("AUTH_PASSWORD_HASH");
    if env_str("AUTH_ENABLED").is_some() || auth_username.is_some() || auth_password_hash.is_some() {
        configs.insert(
            "auth".to_string(),
            section([
                ("enabled", json!(auth_enabled)),
                ("username", json!(auth_username.unwrap_or_default())),
                ("password_hash", json!(auth_password_hash.unwrap_or_default())),
            ]),
        );
    }

    configs
}

/// Seeds every built section via `SET ... NX`. Returns which sections were
/// actually written (vs. already present).
pub async fn seed_all_config(broker: &dyn Broker) -> Result<HashMap<String, bool>, SenseError> {
    let config_map = build_config_map();
    let mut results = HashMap::with_capacity(config_map.len());
    for (section, data) in config_map {
        let written = broker.seed_config(&section, &data).await?;
        if written {
            info!(section = %section, "seeded config from environment");
        } else {
            debug!(section = %section, "config already exists, skipping seed");
        }
        results.insert(section, written);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_broker::FakeBroker;

    #[test]
    fn schedule_section_is_always_present() {
        let configs = build_config_map();
        assert!(configs.contains_key("schedule"));
        assert_eq!(configs["schedule"]["tailscale"], json!(30));
    }

    #[tokio::test]
    async fn seed_all_config_skips_pre_existing_sections() {
        let broker = FakeBroker::new();
        broker
            .write_config("schedule", &section([("tailscale", json!(99))]))
            .await
            .unwrap();

        let results = seed_all_config(&broker).await.unwrap();
        assert_eq!(results.get("schedule"), Some(&false));

        let stored = broker.read_config("schedule").await.unwrap().unwrap();
        assert_eq!(stored["tailscale"], json!(99));
    }
}
