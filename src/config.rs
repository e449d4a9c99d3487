//! Configuration Module
//!
//! Handles loading and managing store and cache configuration from environment variables.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::StoreConfig;

/// Process configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding disk-resident tables
    pub data_dir: PathBuf,
    /// Name of this node
    pub node_name: String,
    /// Nodes that keep a disk copy of the table
    pub replica_nodes: Vec<String>,
    /// Name of the content table
    pub table_name: String,
    /// Bounded wait for the table to become ready, in milliseconds
    pub table_wait_timeout_ms: u64,
    /// Background log compaction interval in seconds
    pub compaction_interval: u64,
    /// Directory the demo upstream reads content from
    pub source_dir: PathBuf,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DATA_DIR` - Table directory (default: ./data)
    /// - `NODE_NAME` - This node's name (default: local)
    /// - `REPLICA_NODES` - Comma-separated disk replicas (default: local)
    /// - `TABLE_NAME` - Content table name (default: content)
    /// - `TABLE_WAIT_TIMEOUT_MS` - Table readiness bound (default: 5000)
    /// - `COMPACTION_INTERVAL` - Compaction frequency in seconds (default: 60)
    /// - `SOURCE_DIR` - Upstream content directory (default: ./content)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            node_name: env::var("NODE_NAME").unwrap_or(defaults.node_name),
            replica_nodes: env::var("REPLICA_NODES")
                .ok()
                .map(|v| parse_node_list(&v))
                .unwrap_or(defaults.replica_nodes),
            table_name: env::var("TABLE_NAME").unwrap_or(defaults.table_name),
            table_wait_timeout_ms: env::var("TABLE_WAIT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.table_wait_timeout_ms),
            compaction_interval: env::var("COMPACTION_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compaction_interval),
            source_dir: env::var("SOURCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.source_dir),
        }
    }

    /// Builds the store bootstrap parameters from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(
            self.data_dir.clone(),
            self.replica_nodes.iter().cloned().collect::<HashSet<_>>(),
        )
        .with_node(self.node_name.clone())
        .with_table(self.table_name.clone())
        .with_ready_timeout(Duration::from_millis(self.table_wait_timeout_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            node_name: "local".to_string(),
            replica_nodes: vec!["local".to_string()],
            table_name: "content".to_string(),
            table_wait_timeout_ms: 5000,
            compaction_interval: 60,
            source_dir: PathBuf::from("./content"),
        }
    }
}

fn parse_node_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .map(String::from)
        .collect()
}
