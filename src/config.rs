use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_dns_port")]
    pub port: u16,
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,
    #[serde(default = "default_max_cache_records")]
    pub max_cache_records: u32,
    #[serde(default = "default_true")]
    pub round_robin: bool,
    #[serde(default)]
    pub recursion_available: bool,
    #[serde(default)]
    pub zone_files: Vec<ZoneFileConfig>,
    #[serde(default = "default_hosts_file")]
    pub hosts_file: String,
    #[serde(default)]
    pub load_hosts: bool,
    /// Empty disables query logging.
    #[serde(default)]
    pub query_log_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneFileConfig {
    pub path: String,
    #[serde(default)]
    pub origin: String,
}

impl DnsConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

// Default functions
fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}
fn default_dns_port() -> u16 {
    53
}
fn default_max_cache_bytes() -> u64 {
    1024 * 1024
}
fn default_max_cache_records() -> u32 {
    1024
}
fn default_hosts_file() -> String {
    "/etc/hosts".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for DnsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}
