use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ConnectionParams, StaticTopology};
use crate::lb::{CorruptionThresholdSuspension, NeverSuspend, NodeSuspensionStrategy, SelectionAlgorithm};
use crate::pool::Policy;

/// Cluster membership and connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Node addresses (host names or IPs)
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Service port on every node (default: 9160)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout in milliseconds (default: 4000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_port() -> u16 {
    9160
}

fn default_connect_timeout_ms() -> u64 {
    4000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ClusterConfig {
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            port: self.port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn topology(&self) -> StaticTopology {
        StaticTopology::new(self.nodes.iter().cloned(), self.connection_params())
    }
}

/// Node selection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// least_loaded, round_robin or power_of_two
    #[serde(default)]
    pub strategy: SelectionAlgorithm,
}

/// Built-in suspension strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionKind {
    #[default]
    Never,
    CorruptionThreshold,
}

/// Node suspension settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionConfig {
    #[serde(default)]
    pub strategy: SuspensionKind,

    /// Corrupted connections between two ticks that suspend a node (default: 3)
    #[serde(default = "default_corruption_threshold")]
    pub corruption_threshold: u64,

    /// Suspension period in milliseconds (default: 30000)
    #[serde(default = "default_suspend_for_ms")]
    pub suspend_for_ms: u64,
}

fn default_corruption_threshold() -> u64 {
    3
}

fn default_suspend_for_ms() -> u64 {
    30_000
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self {
            strategy: SuspensionKind::default(),
            corruption_threshold: default_corruption_threshold(),
            suspend_for_ms: default_suspend_for_ms(),
        }
    }
}

impl SuspensionConfig {
    pub fn build(&self) -> Arc<dyn NodeSuspensionStrategy> {
        match self.strategy {
            SuspensionKind::Never => Arc::new(NeverSuspend),
            SuspensionKind::CorruptionThreshold => Arc::new(CorruptionThresholdSuspension::new(
                self.corruption_threshold,
                Duration::from_millis(self.suspend_for_ms),
            )),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Pool sizing and timing
    #[serde(default)]
    pub pool: Policy,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub suspension: SuspensionConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject configurations the pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cluster.nodes.is_empty() {
            anyhow::bail!("No cluster nodes configured");
        }

        if let Some(blank) = self.cluster.nodes.iter().find(|n| n.trim().is_empty()) {
            anyhow::bail!("Invalid node address '{}'", blank);
        }

        if let Some(max_idle) = self.pool.max_idle_per_node() {
            if self.pool.min_idle_per_node() > max_idle {
                anyhow::bail!(
                    "min_idle_per_node ({}) exceeds max_idle_per_node ({})",
                    self.pool.min_idle_per_node,
                    self.pool.max_idle_per_node
                );
            }
        }

        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config = serde_yaml::from_str(&content)
        .context("Failed to parse YAML configuration")?;

    Ok(config)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

/// Load configuration from environment variables
///
/// - CLUSTERPOOL_NODES (comma-separated list of node addresses)
/// - CLUSTERPOOL_PORT (optional, defaults to 9160)
/// - CLUSTERPOOL_MAX_ACTIVE_PER_NODE (optional)
/// - CLUSTERPOOL_MAX_WAIT_MS (optional)
/// - CLUSTERPOOL_MAINTENANCE_INTERVAL_MS (optional)
/// - CLUSTERPOOL_SELECTION (optional, least_loaded | round_robin | power_of_two)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = Config::new();

    let nodes_str = std::env::var("CLUSTERPOOL_NODES")
        .context("CLUSTERPOOL_NODES environment variable not set")?;

    config.cluster.nodes = nodes_str
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if config.cluster.nodes.is_empty() {
        anyhow::bail!("CLUSTERPOOL_NODES contains no valid addresses");
    }

    if let Some(port) = parse_env("CLUSTERPOOL_PORT")? {
        config.cluster.port = port;
    }

    if let Some(max_active) = parse_env("CLUSTERPOOL_MAX_ACTIVE_PER_NODE")? {
        config.pool.max_active_per_node = max_active;
    }

    if let Some(max_wait) = parse_env("CLUSTERPOOL_MAX_WAIT_MS")? {
        config.pool.max_wait_for_connection_millis = max_wait;
    }

    if let Some(interval) = parse_env("CLUSTERPOOL_MAINTENANCE_INTERVAL_MS")? {
        config.pool.maintenance_interval_millis = interval;
    }

    if let Ok(strategy) = std::env::var("CLUSTERPOOL_SELECTION") {
        config.selection.strategy = strategy
            .trim()
            .parse()
            .context("Invalid CLUSTERPOOL_SELECTION")?;
    }

    Ok(config)
}

/// Load configuration from a YAML file if given, otherwise from the environment
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}
