//! Configuration parsing and validation.
//!
//! Cache configuration is loaded from TOML files. Each `[cache.<name>]`
//! table declares one coordinator instance: the ordered layer list, the
//! soft TTL, and one sub-table per layer with the backend options.
//!
//! ```toml
//! [cache.result]
//! layers      = ["mem", "user-redis"]
//! soft-ttl-ms = 10000
//!
//! [cache.result.mem]
//! type             = "memory"
//! max-memory-bytes = 8388608
//! ttl-ms           = 3600000
//!
//! [cache.result.user-redis]
//! type    = "remote"
//! address = "127.0.0.1:6379"
//! ttl-ms  = 7200000
//! ```
//!
//! Parsing accepts any shape that is syntactically valid; semantic checks
//! (unknown layer type, zero soft TTL, empty layer list) happen when the
//! registry builds instances, so that one broken instance does not take
//! down the rest.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cache instances keyed by name.
    #[serde(default)]
    pub cache: HashMap<String, InstanceConfig>,
}

/// Configuration for one coordinator instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceConfig {
    /// Ordered layer names, index 0 is the fastest layer.
    #[serde(default)]
    pub layers: Vec<String>,

    /// Soft TTL in milliseconds; the age past which reads signal "refresh".
    #[serde(default)]
    pub soft_ttl_ms: u64,

    /// Per-layer option tables, keyed by layer name.
    #[serde(flatten)]
    pub layer: HashMap<String, LayerConfig>,
}

/// Options for a single layer.
///
/// The `type` tag selects the backend; the remaining fields are read by
/// the backends that use them and ignored otherwise, as in the source
/// configuration tree this models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LayerConfig {
    /// Backend kind: `memory`, `tiny`, `remote` or `remote-cluster`.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Master endpoint (`remote`, `remote-cluster`).
    #[serde(default)]
    pub address: String,

    /// Replica endpoints (`remote-cluster`).
    #[serde(default)]
    pub slaves: Vec<String>,

    /// Explicit shard list (`remote-cluster`). Supersedes `address`/`slaves`
    /// when non-empty.
    #[serde(default)]
    pub shards: Vec<ShardAddress>,

    /// Logical database index (`remote*`).
    #[serde(default)]
    pub db: u32,

    /// Hard TTL in milliseconds; 0 means unbounded.
    #[serde(default)]
    pub ttl_ms: u64,

    /// Per-command deadline for remote connections, in milliseconds.
    /// Applied only when at least 1000.
    #[serde(default)]
    pub idle_timeout_ms: u64,

    /// Memory cap in bytes for the bounded in-process store; 0 means
    /// unbounded.
    #[serde(default)]
    pub max_memory_bytes: usize,

    /// Amnesia chance, 0..=100.
    #[serde(default)]
    pub amnesia: u8,

    /// Whether stored bytes are zlib-compressed.
    #[serde(default)]
    pub compression: bool,
}

/// One shard of a remote cluster: a master and its replicas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShardAddress {
    /// Master endpoint.
    pub address: String,

    /// Replica endpoints.
    #[serde(default)]
    pub slaves: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "failed to parse cache config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate syntactic bounds that hold for every instance.
    pub fn validate(&self) -> Result<()> {
        for (name, instance) in &self.cache {
            for (layer_name, layer) in &instance.layer {
                if layer.amnesia > 100 {
                    anyhow::bail!(
                        "cache.{}.{}.amnesia must be in 0..=100, got {}",
                        name,
                        layer_name,
                        layer.amnesia
                    );
                }
            }
        }
        Ok(())
    }
}

impl InstanceConfig {
    /// Soft TTL as a [`Duration`].
    pub fn soft_ttl(&self) -> Duration {
        Duration::from_millis(self.soft_ttl_ms)
    }

    /// Look up the option table for a named layer.
    pub fn layer_config(&self, layer_name: &str) -> Option<&LayerConfig> {
        self.layer.get(layer_name)
    }
}

impl LayerConfig {
    /// Hard TTL as a [`Duration`]; zero when unbounded.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Per-command deadline as a [`Duration`]; zero when disabled.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// The shard topology for a remote-cluster layer.
    ///
    /// Falls back to the single `(address, slaves)` shard when no explicit
    /// `shards` list is configured.
    pub fn shard_addresses(&self) -> Vec<ShardAddress> {
        if !self.shards.is_empty() {
            return self.shards.clone();
        }
        vec![ShardAddress {
            address: self.address.clone(),
            slaves: self.slaves.clone(),
        }]
    }
}
