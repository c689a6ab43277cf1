// src/discover.rs

//! Discover mode (spec.md §4.4.7): scan the local /24 for hosts listening on
//! an RTSP candidate port. Grounded on
//! `original_source/services/source-camera/camera/discovery.py`, with the
//! `psutil`-based interface walk replaced by `local-ip-address` per
//! SPEC_FULL.md §4.4.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// The candidate RTSP ports scanned during discovery.
pub const RTSP_PORTS: [u16; 3] = [554, 8554, 10554];

const PER_HOST_TIMEOUT: Duration = Duration::from_millis(1500);
const MAX_CONCURRENT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredCamera {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Returns every host address in `network`'s `/24` except the network and
/// broadcast addresses.
fn hosts_in_24(network: Ipv4Addr) -> Vec<Ipv4Addr> {
    let octets = network.octets();
    (1..255)
        .map(|last| Ipv4Addr::new(octets[0], octets[1], octets[2], last))
        .collect()
}

/// Best-effort local-network detection: the machine's own non-loopback IPv4
/// address, generalized to its containing `/24`.
fn local_network() -> Option<Ipv4Addr> {
    match local_ip_address::local_ip() {
        Ok(std::net::IpAddr::V4(ip)) => Some(ip),
        _ => None,
    }
}

async fn probe(host: Ipv4Addr, port: u16, semaphore: Arc<Semaphore>) -> Option<Ipv4Addr> {
    let _permit = semaphore.acquire_owned().await.ok()?;
    match timeout(PER_HOST_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Some(host),
        _ => None,
    }
}

/// Scans the local `/24` for hosts with an RTSP-listening port open,
/// time-boxed by `total_budget` overall, bounded concurrency of at most 100
/// in-flight connects.
pub async fn discover_cameras(total_budget: Duration) -> Vec<DiscoveredCamera> {
    let Some(local) = local_network() else {
        tracing::warn!("could not detect local network, skipping camera discovery");
        return Vec::new();
    };

    let hosts = hosts_in_24(local);
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
    let per_port_budget = (total_budget / RTSP_PORTS.len() as u32).max(Duration::from_secs(5));

    tracing::info!(
        hosts = hosts.len(),
        ports = ?RTSP_PORTS,
        budget_secs = total_budget.as_secs(),
        "starting camera discovery"
    );

    let mut found = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for port in RTSP_PORTS {
        let tasks: Vec<_> = hosts
            .iter()
            .map(|&host| {
                let sem = semaphore.clone();
                tokio::spawn(async move { probe(host, port, sem).await })
            })
            .collect();

        let scan = async {
            let mut hits = Vec::new();
            for task in tasks {
                if let Ok(Some(host)) = task.await {
                    hits.push(host);
                }
            }
            hits
        };

        if let Ok(hits) = timeout(per_port_budget, scan).await {
            for host in hits {
                let key = (host, port);
                if seen.insert(key) {
                    found.push(DiscoveredCamera {
                        name: format!("Camera at {host}:{port}"),
                        host: host.to_string(),
                        port,
                    });
                }
            }
        } else {
            tracing::debug!(port, "port scan timed out");
        }
    }

    tracing::info!(found = found.len(), "camera discovery complete");
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_in_24_excludes_network_and_broadcast() {
        let hosts = hosts_in_24(Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(hosts.len(), 254);
        assert!(!hosts.contains(&Ipv4Addr::new(192, 168, 1, 0)));
        assert!(!hosts.contains(&Ipv4Addr::new(192, 168, 1, 255)));
        assert!(hosts.contains(&Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[tokio::test]
    async fn probe_against_closed_port_returns_none() {
        // Port 1 is reserved and essentially never accepting connections
        // in a sandboxed test environment.
        let semaphore = Arc::new(Semaphore::new(1));
        let result = probe(Ipv4Addr::new(127, 0, 0, 1), 1, semaphore).await;
        assert!(result.is_none());
    }
}
