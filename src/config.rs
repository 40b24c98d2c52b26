//! Exporter configuration loaded from a YAML file.
//!
//! Every source can be disabled independently; a disabled source is a no-op
//! during refresh and contributes nothing to the exported metrics.

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::{FleetmapError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the /metrics endpoint listens on.
    pub listen_address: String,

    /// Fixed local address override. When unset the local address is
    /// resolved with a default-route probe at refresh time.
    pub local_address: Option<IpAddr>,

    pub inventory: InventoryConfig,
    pub traffic: ScrapeSourceConfig,
    pub ebpf_traffic: ScrapeSourceConfig,
    pub socket: SocketSourceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            local_address: None,
            inventory: InventoryConfig::default(),
            traffic: ScrapeSourceConfig::default(),
            ebpf_traffic: ScrapeSourceConfig::default(),
            socket: SocketSourceConfig::default(),
        }
    }
}

/// Inventory registry endpoint returning a JSON array of host identities.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub enabled: bool,
    pub address: Option<String>,
    pub interval_secs: u64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: None,
            interval_secs: 300,
        }
    }
}

/// A source scraped from a remote exposition-format metrics endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeSourceConfig {
    pub enabled: bool,
    pub address: Option<String>,
    pub interval_secs: u64,
    /// Metric family expected in the scraped document. Each source task
    /// carries its own default, so this is only an override.
    pub metric_family: Option<String>,
}

impl Default for ScrapeSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: None,
            interval_secs: 30,
            metric_family: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketSourceConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SocketSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30,
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:19100".to_string()
}

impl Config {
    /// Load configuration from a YAML file. A missing file yields defaults
    /// so the exporter can start with every source disabled.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| FleetmapError::ConfigError(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.traffic.enabled);
        assert!(config.traffic.metric_family.is_none());
        assert!(config.local_address.is_none());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
listen_address: "127.0.0.1:9999"
local_address: "10.1.2.3"
traffic:
  enabled: true
  address: "http://127.0.0.1:666/metrics"
socket:
  enabled: true
  interval_secs: 10
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen_address, "127.0.0.1:9999");
        assert_eq!(config.local_address, Some("10.1.2.3".parse().unwrap()));
        assert!(config.traffic.enabled);
        assert_eq!(
            config.traffic.address.as_deref(),
            Some("http://127.0.0.1:666/metrics")
        );
        // Fields absent from the file keep their defaults.
        assert_eq!(config.traffic.interval_secs, 30);
        assert!(config.traffic.metric_family.is_none());
        assert!(!config.ebpf_traffic.enabled);
        assert_eq!(config.socket.interval_secs, 10);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/fleetmap.yaml")).unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:19100");
    }
}
