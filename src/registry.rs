//! Registry of coordinator instances built from configuration.
//!
//! The registry is constructed once at startup and read-only afterwards.
//! A broken instance (missing layer section, unknown layer type, zero soft
//! TTL) is logged and skipped so the remaining instances still come up; a
//! registry with zero valid instances is an error.

use crate::core::config::{Config, InstanceConfig, LayerConfig};
use crate::core::error::{StrataError, StrataResult};
use crate::instance::CacheInstance;
use crate::layers::memory::BoundedMemoryLayer;
use crate::layers::remote::{RemoteShard, ShardedRemoteLayer};
use crate::layers::tiny::TinyLayer;
use crate::layers::CacheLayer;
use crate::observe::{Counter, NullCounter, NullTimer, Timer};
use crate::remote::{self, RemoteStore, RespStore};
use std::collections::HashMap;
use std::sync::Arc;

/// Named map of cache coordinators.
pub struct CacheRegistry {
    instances: HashMap<String, Arc<CacheInstance>>,
}

impl CacheRegistry {
    /// Build every configured instance.
    ///
    /// `timer` and `counter` default to the null ports when absent. Remote
    /// connections are created eagerly and pinged in the background; an
    /// unreachable endpoint does not fail construction. Must run inside a
    /// tokio runtime.
    pub fn new(
        config: &Config,
        timer: Option<Arc<dyn Timer>>,
        counter: Option<Arc<dyn Counter>>,
    ) -> StrataResult<Self> {
        let timer = timer.unwrap_or_else(|| Arc::new(NullTimer::new()));
        let counter = counter.unwrap_or_else(|| Arc::new(NullCounter::new()));

        if config.cache.is_empty() {
            return Err(StrataError::InvalidConfig(
                "no cache configurations found".to_string(),
            ));
        }

        let mut instances = HashMap::with_capacity(config.cache.len());
        for (name, instance_config) in &config.cache {
            match build_instance(name, instance_config, &timer, &counter) {
                Ok(instance) => {
                    tracing::info!(
                        instance = %name,
                        layers = instance_config.layers.len(),
                        "cache instance initialized"
                    );
                    instances.insert(name.clone(), Arc::new(instance));
                }
                Err(err) => {
                    tracing::error!(
                        instance = %name,
                        %err,
                        "failed to initialize cache instance"
                    );
                }
            }
        }

        if instances.is_empty() {
            return Err(StrataError::InvalidConfig(
                "no valid cache instances created".to_string(),
            ));
        }
        Ok(Self { instances })
    }

    /// Retrieve an instance by name.
    ///
    /// Panics on a missing name: asking for an instance that was never
    /// configured is a programming error in the host, not a runtime
    /// condition.
    pub fn select(&self, name: &str) -> Arc<CacheInstance> {
        match self.instances.get(name) {
            Some(instance) => Arc::clone(instance),
            None => panic!("cache instance {:?} not found", name),
        }
    }

    /// Retrieve an instance by name without the fatal contract.
    pub fn try_select(&self, name: &str) -> Option<Arc<CacheInstance>> {
        self.instances.get(name).map(Arc::clone)
    }

    /// Names of the instances that came up.
    pub fn instance_names(&self) -> Vec<&str> {
        self.instances.keys().map(String::as_str).collect()
    }
}

fn build_instance(
    name: &str,
    config: &InstanceConfig,
    timer: &Arc<dyn Timer>,
    counter: &Arc<dyn Counter>,
) -> StrataResult<CacheInstance> {
    if config.layers.is_empty() {
        return Err(StrataError::InvalidConfig(format!(
            "no layers configured for cache instance {:?}",
            name
        )));
    }

    let mut layers: Vec<Arc<dyn CacheLayer>> = Vec::with_capacity(config.layers.len());
    for layer_name in &config.layers {
        let layer_config = config.layer_config(layer_name).ok_or_else(|| {
            StrataError::InvalidConfig(format!(
                "missing configuration for layer {:?} of instance {:?}",
                layer_name, name
            ))
        })?;
        layers.push(build_layer(layer_name, layer_config, timer)?);
    }

    CacheInstance::new(name, layers, config.soft_ttl(), Arc::clone(counter))
}

fn build_layer(
    name: &str,
    config: &LayerConfig,
    timer: &Arc<dyn Timer>,
) -> StrataResult<Arc<dyn CacheLayer>> {
    match config.kind.as_str() {
        "memory" => Ok(Arc::new(BoundedMemoryLayer::new(
            name,
            config.max_memory_bytes,
            config.ttl(),
            config.amnesia,
            config.compression,
        ))),

        "tiny" => Ok(Arc::new(TinyLayer::new(
            name,
            config.amnesia,
            config.compression,
        ))),

        "remote" => {
            if config.address.is_empty() {
                return Err(StrataError::InvalidConfig(format!(
                    "remote layer {:?} has no address",
                    name
                )));
            }
            let master = connect(&config.address, config);
            let layer = ShardedRemoteLayer::new(
                name,
                vec![RemoteShard::single(master)],
                config.ttl(),
                config.amnesia,
                config.compression,
                Arc::clone(timer),
            )?;
            Ok(Arc::new(layer))
        }

        "remote-cluster" => {
            let mut shards = Vec::new();
            for shard in config.shard_addresses() {
                if shard.address.is_empty() {
                    return Err(StrataError::InvalidConfig(format!(
                        "remote-cluster layer {:?} has a shard without a master address",
                        name
                    )));
                }
                let master = connect(&shard.address, config);
                let replicas = shard
                    .slaves
                    .iter()
                    .map(|addr| connect(addr, config))
                    .collect();
                shards.push(RemoteShard { master, replicas });
            }
            let layer = ShardedRemoteLayer::new(
                name,
                shards,
                config.ttl(),
                config.amnesia,
                config.compression,
                Arc::clone(timer),
            )?;
            Ok(Arc::new(layer))
        }

        other => Err(StrataError::InvalidConfig(format!(
            "unknown layer type {:?} for layer {:?}",
            other, name
        ))),
    }
}

/// Create a connection object and probe it in the background.
fn connect(addr: &str, config: &LayerConfig) -> Arc<dyn RemoteStore> {
    let store: Arc<dyn RemoteStore> =
        Arc::new(RespStore::new(addr, config.db, config.idle_timeout()));
    remote::spawn_ping(Arc::clone(&store));
    store
}
