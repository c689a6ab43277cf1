// src/system.rs

//! Ephemeral system-metrics source, grounded on
//! `original_source/services/source-system/system/source.py`: the same
//! four readings (`cpu_percent`, `memory_percent`, `load_1min`, `cpu_temp`),
//! collected with `sysinfo` in place of `psutil` (the enrichment crate kept
//! in the workspace for exactly this purpose, per DESIGN.md). Sampling runs
//! on a blocking thread since `sysinfo` refreshes are synchronous and, like
//! `psutil.cpu_percent(interval=1)`, briefly sleep between two samples.

use std::time::Duration;

use async_trait::async_trait;
use sense_broker::{SensorReading, SourceMetadata};
use sense_worker::Source;
use sysinfo::{Components, System};

const CPU_SAMPLE_GAP: Duration = Duration::from_millis(200);

pub struct SystemSource;

#[async_trait]
impl Source for SystemSource {
    fn source_id(&self) -> &str {
        "system"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            source_id: "system".into(),
            name: "System Stats".into(),
            description: "CPU, memory, load, and temperature metrics".into(),
            refresh_interval: 30,
            enabled: true,
        }
    }

    async fn poll(&self) -> anyhow::Result<Vec<SensorReading>> {
        let stats = tokio::task::spawn_blocking(collect_stats).await?;
        Ok(vec![
            SensorReading::new("cpu_percent", stats.cpu_percent).with_unit("%"),
            SensorReading::new("memory_percent", stats.memory_percent).with_unit("%"),
            SensorReading::new("load_1min", stats.load_1min).with_unit("load"),
            SensorReading::new("cpu_temp", stats.cpu_temp).with_unit("C"),
        ])
    }
}

struct Stats {
    cpu_percent: f64,
    memory_percent: f64,
    load_1min: f64,
    cpu_temp: f64,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn collect_stats() -> Stats {
    let mut sys = System::new_all();
    sys.refresh_cpu_usage();
    std::thread::sleep(CPU_SAMPLE_GAP);
    sys.refresh_cpu_usage();
    let cpu_percent = round1(sys.global_cpu_usage() as f64);

    sys.refresh_memory();
    let memory_percent = if sys.total_memory() > 0 {
        round1(sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0)
    } else {
        0.0
    };

    let load_1min = round1(System::load_average().one);

    let mut cpu_temp = 0.0;
    for component in Components::new_with_refreshed_list().iter() {
        let label = component.label().to_lowercase();
        if label.contains("cpu_thermal") || label.contains("coretemp") || label.contains("cpu") {
            let temp = component.temperature();
            if !temp.is_nan() {
                cpu_temp = round1(temp as f64);
                break;
            }
        }
    }

    Stats {
        cpu_percent,
        memory_percent,
        load_1min,
        cpu_temp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round1_rounds_to_one_decimal() {
        assert_eq!(round1(12.345), 12.3);
        assert_eq!(round1(12.35), 12.3);
        assert_eq!(round1(0.0), 0.0);
    }

    #[tokio::test]
    async fn poll_returns_four_readings_with_expected_sensor_ids() {
        let source = SystemSource;
        let readings = source.poll().await.unwrap();
        let ids: Vec<&str> = readings.iter().map(|r| r.sensor_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["cpu_percent", "memory_percent", "load_1min", "cpu_temp"]
        );
    }
}
