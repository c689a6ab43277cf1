// src/keys.rs

//! Key-space layout: the five key families from the broker contract, plus
//! their TTL discipline.

use std::time::Duration;

/// TTL for `source:{source_id}:{sensor_id}` keys.
pub const READING_TTL: Duration = Duration::from_secs(60);
/// TTL for `status:{source_id}` keys.
pub const STATUS_TTL: Duration = Duration::from_secs(120);
/// TTL for `scan:{scope}` keys.
pub const SCAN_TTL: Duration = Duration::from_secs(60);

pub fn reading_key(source_id: &str, sensor_id: &str) -> String {
    format!("source:{source_id}:{sensor_id}")
}

pub fn source_scan_pattern(source_id: &str) -> String {
    format!("source:{source_id}:*")
}

pub const ALL_SOURCES_PATTERN: &str = "source:*";
pub const ALL_STATUS_PATTERN: &str = "status:*";

pub fn meta_key(source_id: &str) -> String {
    format!("meta:{source_id}")
}

pub fn status_key(source_id: &str) -> String {
    format!("status:{source_id}")
}

pub fn config_key(section: &str) -> String {
    format!("config:{section}")
}

pub fn scan_key(scope: &str) -> String {
    format!("scan:{scope}")
}

/// Splits a `source:{source_id}:{sensor_id}` key into its two components.
/// Returns `None` if the key does not have exactly three `:`-delimited parts.
pub fn parse_reading_key(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.splitn(3, ':');
    let prefix = parts.next()?;
    let source_id = parts.next()?;
    let sensor_id = parts.next()?;
    if prefix != "source" || sensor_id.is_empty() {
        return None;
    }
    Some((source_id, sensor_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_patterns() {
        assert_eq!(reading_key("weather", "temp"), "source:weather:temp");
        assert_eq!(meta_key("weather"), "meta:weather");
        assert_eq!(status_key("weather"), "status:weather");
        assert_eq!(config_key("schedule"), "config:schedule");
        assert_eq!(scan_key("network_camera"), "scan:network_camera");
    }

    #[test]
    fn parses_reading_keys() {
        assert_eq!(
            parse_reading_key("source:weather:temp"),
            Some(("weather", "temp"))
        );
        assert_eq!(parse_reading_key("meta:weather"), None);
        assert_eq!(parse_reading_key("source:weather"), None);
    }
}
