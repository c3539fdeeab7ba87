//! Configuration schema and loader for pulse nodes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which outer surfaces this node runs. Gossip, the peer-aggregate
/// listener, the flusher, and metrics run in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    IngestOnly,
    QueryOnly,
    Both,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Both
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique cluster identifier for this node.
    pub node_id: String,

    /// Which services to run.
    #[serde(default)]
    pub mode: Mode,

    /// Host used for listen and advertised addresses.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port of the gossip listener.
    #[serde(default = "default_gossip_port")]
    pub gossip_port: u16,

    /// TCP port of the peer query listener.
    #[serde(default = "default_query_port")]
    pub query_port: u16,

    /// Message-bus endpoint this node subscribes to.
    #[serde(default = "default_bus_url")]
    pub bus_url: String,

    /// Gossip bootstrap addresses, `host:port`.
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Cluster settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Owners per routing key (primary + replicas).
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Virtual nodes per physical node on the hash ring.
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,

    /// Gossip dissemination period in milliseconds.
    #[serde(default = "default_gossip_interval_ms")]
    pub gossip_interval_ms: u64,

    /// Ring reconciliation period in milliseconds.
    #[serde(default = "default_ring_sync_interval_ms")]
    pub ring_sync_interval_ms: u64,

    /// ACTIVE peers contacted per gossip round.
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Deadline for remote partial-aggregate requests, milliseconds.
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replication_factor: default_replication_factor(),
            virtual_nodes: default_virtual_nodes(),
            gossip_interval_ms: default_gossip_interval_ms(),
            ring_sync_interval_ms: default_ring_sync_interval_ms(),
            fanout: default_fanout(),
            peer_timeout_ms: default_peer_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding this node's columnar data file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Drain the ingest batch at this size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Periodic flush interval in seconds.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Treat `start=0, end>0` as a half-open interval instead of the
    /// historical whole-series read.
    #[serde(default)]
    pub strict_end_bound: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            strict_end_bound: false,
        }
    }
}

impl NodeConfig {
    /// Gossip listen/advertise address.
    pub fn gossip_addr(&self) -> String {
        format!("{}:{}", self.host, self.gossip_port)
    }

    /// Peer query listen/advertise address.
    pub fn query_addr(&self) -> String {
        format!("{}:{}", self.host, self.query_port)
    }

    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.cluster.replication_factor == 0 {
            return Err(ConfigError::Invalid(
                "cluster.replication_factor must be >= 1".into(),
            ));
        }
        if self.cluster.virtual_nodes == 0 {
            return Err(ConfigError::Invalid(
                "cluster.virtual_nodes must be > 0".into(),
            ));
        }
        if self.cluster.fanout == 0 {
            return Err(ConfigError::Invalid("cluster.fanout must be > 0".into()));
        }
        if self.cluster.gossip_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "cluster.gossip_interval_ms must be > 0".into(),
            ));
        }
        if self.storage.batch_size == 0 {
            return Err(ConfigError::Invalid("storage.batch_size must be > 0".into()));
        }
        if self.gossip_port == self.query_port {
            return Err(ConfigError::Invalid(
                "gossip_port and query_port must differ".into(),
            ));
        }
        Ok(())
    }
}

// --- Defaults ---

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_gossip_port() -> u16 {
    9000
}
fn default_query_port() -> u16 {
    8080
}
fn default_bus_url() -> String {
    "tcp://localhost:1883".to_string()
}
fn default_replication_factor() -> usize {
    2
}
fn default_virtual_nodes() -> usize {
    150
}
fn default_gossip_interval_ms() -> u64 {
    2000
}
fn default_ring_sync_interval_ms() -> u64 {
    3000
}
fn default_fanout() -> usize {
    3
}
fn default_peer_timeout_ms() -> u64 {
    5000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_batch_size() -> usize {
    10
}
fn default_flush_interval_secs() -> u64 {
    5
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Load a `NodeConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
