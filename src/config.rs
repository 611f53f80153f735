//! ShardSync Configuration
//!
//! This module provides configuration structures for the ShardSync
//! replicated-log follower.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main ShardSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSyncConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster configuration (core nodes, shards, reconnect behavior)
    pub cluster: ClusterConfig,

    /// Spill queue configuration
    #[serde(default)]
    pub spill: SpillConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Data directory for local state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Candidate core node addresses (host:port)
    #[serde(default)]
    pub cores: Vec<String>,

    /// Shards this node follows
    #[serde(default)]
    pub shards: Vec<String>,

    /// Reconnect interval in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Spill queue configuration
///
/// The spill queue buffers real-time transaction batches while historical
/// data is still being copied. Durability is not required: on crash the
/// queue is discarded along with the partially bootstrapped state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillConfig {
    /// Keep the queue entirely in memory (no disk segments)
    #[serde(default = "default_true")]
    pub mem_only: bool,

    /// Base directory for on-disk spill segments
    /// (a per-shard subdirectory is derived from the shard name)
    #[serde(default = "default_spill_dir")]
    pub dir: PathBuf,

    /// Entries per on-disk segment before rotation
    #[serde(default = "default_max_segment_entries")]
    pub max_segment_entries: usize,

    /// Enable LZ4 compression for spilled records
    #[serde(default = "default_true")]
    pub compression: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log to file path (optional)
    pub file: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/shardsync")
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10000
}

fn default_spill_dir() -> PathBuf {
    PathBuf::from("/tmp/rlog")
}

fn default_max_segment_entries() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            mem_only: true,
            dir: default_spill_dir(),
            max_segment_entries: default_max_segment_entries(),
            compression: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl ShardSyncConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: ShardSyncConfig = toml::from_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ShardSyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides:
    /// `RLOG_REPLAYQ_MEM_ONLY`, `RLOG_REPLAYQ_DIR`,
    /// `RLOG_REPLICA_RECONNECT_INTERVAL` (milliseconds)
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(v) = std::env::var("RLOG_REPLAYQ_MEM_ONLY") {
            self.spill.mem_only = parse_bool(&v).ok_or_else(|| {
                crate::Error::Config(format!("RLOG_REPLAYQ_MEM_ONLY: invalid bool '{}'", v))
            })?;
        }

        if let Ok(v) = std::env::var("RLOG_REPLAYQ_DIR") {
            self.spill.dir = PathBuf::from(v);
        }

        if let Ok(v) = std::env::var("RLOG_REPLICA_RECONNECT_INTERVAL") {
            self.cluster.reconnect_interval_ms = v.parse().map_err(|_| {
                crate::Error::Config(format!(
                    "RLOG_REPLICA_RECONNECT_INTERVAL: invalid milliseconds '{}'",
                    v
                ))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.cluster.cores.is_empty() {
            return Err(crate::Error::Config(
                "cluster.cores cannot be empty".into(),
            ));
        }

        if self.cluster.shards.is_empty() {
            return Err(crate::Error::Config(
                "cluster.shards cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Get reconnect interval as Duration
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.reconnect_interval_ms)
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.connect_timeout_ms)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.request_timeout_ms)
    }

    /// Get the spill directory for a specific shard
    pub fn spill_dir_for(&self, shard: &str) -> PathBuf {
        self.spill.dir.join(shard)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "replicant-1"

[cluster]
cores = ["10.0.0.1:7654", "10.0.0.2:7654"]
shards = ["shard-a", "shard-b"]

[spill]
mem_only = false
dir = "/var/spool/rlog"
"#;

        let config = ShardSyncConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "replicant-1");
        assert_eq!(config.cluster.cores.len(), 2);
        assert_eq!(config.cluster.reconnect_interval_ms, 5000);
        assert!(!config.spill.mem_only);
        assert_eq!(
            config.spill_dir_for("shard-a"),
            PathBuf::from("/var/spool/rlog/shard-a")
        );
    }

    #[test]
    fn test_validation() {
        let toml = r#"
[node]
id = "replicant-1"

[cluster]
cores = []
shards = ["shard-a"]
"#;
        assert!(ShardSyncConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let toml = r#"
[node]
id = "replicant-1"

[cluster]
cores = ["10.0.0.1:7654"]
shards = ["shard-a"]
"#;
        let mut config = ShardSyncConfig::from_str(toml).unwrap();
        assert!(config.spill.mem_only);

        std::env::set_var("RLOG_REPLAYQ_MEM_ONLY", "false");
        std::env::set_var("RLOG_REPLAYQ_DIR", "/data/rlog");
        std::env::set_var("RLOG_REPLICA_RECONNECT_INTERVAL", "250");
        let result = config.apply_env();
        std::env::remove_var("RLOG_REPLAYQ_MEM_ONLY");
        std::env::remove_var("RLOG_REPLAYQ_DIR");
        std::env::remove_var("RLOG_REPLICA_RECONNECT_INTERVAL");

        result.unwrap();
        assert!(!config.spill.mem_only);
        assert_eq!(config.spill.dir, PathBuf::from("/data/rlog"));
        assert_eq!(config.cluster.reconnect_interval_ms, 250);
    }
}
