//! Cluster Configuration
//!
//! Configuration types for gossip-based cluster membership.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;

/// Cluster configuration for gossip-based membership
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Whether clustering is enabled. When disabled the node runs as a
    /// single-member in-process cluster.
    pub enabled: bool,

    /// Member UUID (random v4 if not set)
    pub node_uuid: Option<String>,

    /// Chitchat cluster identifier; nodes with different ids ignore each other
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Address for gossip protocol (chitchat) to bind to
    /// Default: 0.0.0.0:7946
    #[serde(default = "default_gossip_addr")]
    pub gossip_addr: SocketAddr,

    /// Advertise address for gossip protocol (what peers use to reach us)
    /// If not set, resolved from hostname or falls back to gossip_addr
    pub gossip_advertise_addr: Option<SocketAddr>,

    /// Seed nodes for cluster discovery
    /// Format: "host:port" (gossip port)
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Gossip interval in milliseconds
    /// Default: 1000
    #[serde(default = "default_gossip_interval")]
    pub gossip_interval: u64,

    /// Longest heartbeat interval the failure detector accepts, in seconds.
    /// Slower heartbeats are dropped from the sample and the node drifts
    /// towards dead.
    /// Default: 5
    #[serde(default = "default_failure_timeout")]
    pub failure_timeout: u64,

    /// Dead node grace period in seconds before removal
    /// Default: 30
    #[serde(default = "default_dead_node_grace_period")]
    pub dead_node_grace_period: u64,

    /// Notifications each node keeps per channel in its gossip state
    /// Default: 64
    #[serde(default = "default_notification_window")]
    pub notification_window: usize,

    /// Attempts at claiming a unique node id before giving up
    /// Default: 10
    #[serde(default = "default_id_claim_attempts")]
    pub id_claim_attempts: u32,
}

fn default_cluster_id() -> String {
    "slotwise".to_string()
}

fn default_gossip_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7946))
}

fn default_gossip_interval() -> u64 {
    1000
}

fn default_failure_timeout() -> u64 {
    5
}

fn default_dead_node_grace_period() -> u64 {
    30
}

fn default_notification_window() -> usize {
    64
}

fn default_id_claim_attempts() -> u32 {
    10
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_uuid: None,
            cluster_id: default_cluster_id(),
            gossip_addr: default_gossip_addr(),
            gossip_advertise_addr: None,
            seeds: Vec::new(),
            gossip_interval: default_gossip_interval(),
            failure_timeout: default_failure_timeout(),
            dead_node_grace_period: default_dead_node_grace_period(),
            notification_window: default_notification_window(),
            id_claim_attempts: default_id_claim_attempts(),
        }
    }
}

impl ClusterConfig {
    /// Get the member UUID, generating a random one if not set
    pub fn get_node_uuid(&self) -> String {
        self.node_uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Get the gossip advertise address (what peers use to reach us)
    /// Priority: explicit config > resolved hostname > bind address
    pub fn get_gossip_advertise_addr(&self) -> SocketAddr {
        if let Some(addr) = self.gossip_advertise_addr {
            return addr;
        }

        // Try to resolve our hostname to get the real IP
        if let Some(ip) = resolve_local_ip() {
            return SocketAddr::new(ip, self.gossip_addr.port());
        }

        // Fallback to bind address
        self.gossip_addr
    }

    /// Get gossip interval as Duration
    pub fn gossip_interval_duration(&self) -> Duration {
        Duration::from_millis(self.gossip_interval)
    }

    /// Get failure timeout as Duration
    pub fn failure_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.failure_timeout)
    }

    /// Get dead node grace period as Duration
    pub fn dead_node_grace_period_duration(&self) -> Duration {
        Duration::from_secs(self.dead_node_grace_period)
    }
}

/// Resolve the local machine's IP address by resolving the hostname
fn resolve_local_ip() -> Option<IpAddr> {
    let hostname = hostname::get().ok()?;
    let hostname_str = hostname.to_string_lossy();

    let addr_str = format!("{}:0", hostname_str);
    addr_str
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4()) // Prefer IPv4
        .map(|addr| addr.ip())
}

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert!(!config.enabled);
        assert!(config.node_uuid.is_none());
        assert_eq!(config.cluster_id, "slotwise");
        assert_eq!(config.gossip_addr, "0.0.0.0:7946".parse().unwrap());
        assert!(config.seeds.is_empty());
        assert_eq!(config.notification_window, 64);
    }

    #[test]
    fn test_get_node_uuid_with_explicit() {
        let mut config = ClusterConfig::default();
        config.node_uuid = Some("6a2f41a3-c54c-fce8-32d2-0324e1c32e22".to_string());
        assert_eq!(
            config.get_node_uuid(),
            "6a2f41a3-c54c-fce8-32d2-0324e1c32e22"
        );
    }

    #[test]
    fn test_get_node_uuid_generated() {
        let config = ClusterConfig::default();
        let a = config.get_node_uuid();
        let b = config.get_node_uuid();
        assert!(uuid::Uuid::parse_str(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn test_explicit_advertise_addr_wins() {
        let mut config = ClusterConfig::default();
        config.gossip_advertise_addr = Some("192.168.1.7:9000".parse().unwrap());
        assert_eq!(
            config.get_gossip_advertise_addr(),
            "192.168.1.7:9000".parse().unwrap()
        );
    }

    #[test]
    fn test_duration_conversions() {
        let mut config = ClusterConfig::default();
        config.gossip_interval = 250;
        config.failure_timeout = 10;
        config.dead_node_grace_period = 60;

        assert_eq!(config.gossip_interval_duration(), Duration::from_millis(250));
        assert_eq!(config.failure_timeout_duration(), Duration::from_secs(10));
        assert_eq!(
            config.dead_node_grace_period_duration(),
            Duration::from_secs(60)
        );
    }
}
