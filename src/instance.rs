//! The multi-layer coordinator.
//!
//! A [`CacheInstance`] owns an ordered stack of layers and presents them as
//! one logical cache. Reads walk the stack from the fastest layer down and
//! back-fill the faster layers on a hit; writes and deletes fan out to
//! every layer and report partial failures as one joined error; reads can
//! additionally be asked whether the value's age has passed the instance's
//! soft TTL and should be refreshed by the caller.
//!
//! Instances are immutable after construction and the layer handles are
//! shared references, so no locking happens at this level.

use crate::core::error::{StrataError, StrataResult};
use crate::envelope::{self, DecodedEnvelope};
use crate::layers::CacheLayer;
use crate::observe::Counter;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A named, ordered stack of cache layers behind a single cache API.
pub struct CacheInstance {
    name: String,
    layers: Vec<Arc<dyn CacheLayer>>,
    soft_ttl: Duration,
    hit_counter: Arc<dyn Counter>,
}

impl CacheInstance {
    /// Create a coordinator over `layers`, index 0 being the fastest.
    pub fn new(
        name: impl Into<String>,
        layers: Vec<Arc<dyn CacheLayer>>,
        soft_ttl: Duration,
        hit_counter: Arc<dyn Counter>,
    ) -> StrataResult<Self> {
        let name = name.into();
        if layers.is_empty() {
            return Err(StrataError::InvalidConfig(format!(
                "no layers configured for cache instance {:?}",
                name
            )));
        }
        if soft_ttl.is_zero() {
            return Err(StrataError::InvalidConfig(format!(
                "invalid soft TTL for cache instance {:?}",
                name
            )));
        }
        Ok(Self {
            name,
            layers,
            soft_ttl,
            hit_counter,
        })
    }

    /// The instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured soft TTL.
    pub fn soft_ttl(&self) -> Duration {
        self.soft_ttl
    }

    /// Walk the stack: first layer that yields a decodable envelope wins.
    ///
    /// Counts the hit as `(name, "layer<i>")` and spawns the back-fill; a
    /// full miss counts `(name, "miss")`. Any layer error advances the walk.
    async fn lookup(&self, key: &str) -> StrataResult<DecodedEnvelope> {
        for (index, layer) in self.layers.iter().enumerate() {
            let bytes = match layer.get(key).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    if !err.is_absent() {
                        tracing::debug!(
                            layer = layer.name(),
                            key,
                            %err,
                            "cache layer error during read walk"
                        );
                    }
                    continue;
                }
            };
            match envelope::decode(&bytes) {
                Ok(decoded) => {
                    self.hit_counter
                        .inc(&[&self.name, &format!("layer{}", index)]);
                    self.spawn_back_fill(key, &bytes, index);
                    return Ok(decoded);
                }
                Err(err) => {
                    tracing::debug!(
                        layer = layer.name(),
                        key,
                        %err,
                        "undecodable cache entry, walking on"
                    );
                }
            }
        }
        self.hit_counter.inc(&[&self.name, "miss"]);
        Err(StrataError::NotFound)
    }

    /// Fire-and-forget back-fill of the envelope bytes into the layers
    /// above the hit, from the layer just above it down to layer 0.
    ///
    /// The bytes are the serialized envelope observed at the hit layer, so
    /// the embedded timestamp is preserved and soft-TTL age stays
    /// consistent across layers. Per-layer failures are logged and never
    /// block the caller.
    fn spawn_back_fill(&self, key: &str, envelope_bytes: &Bytes, hit_layer: usize) {
        if hit_layer == 0 {
            return;
        }
        let targets: Vec<Arc<dyn CacheLayer>> = self.layers[..hit_layer].to_vec();
        let key = key.to_string();
        let bytes = envelope_bytes.clone();
        tokio::spawn(async move {
            for (index, layer) in targets.iter().enumerate().rev() {
                if let Err(err) = layer.set(&key, bytes.clone()).await {
                    tracing::error!(
                        layer = layer.name(),
                        index,
                        key = %key,
                        %err,
                        "failed to back-fill cache layer"
                    );
                }
            }
        });
    }

    /// Retrieve the value for `key`, decoded into the caller's type.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StrataResult<T> {
        self.lookup(key).await?.decode_object()
    }

    /// Retrieve the value and report whether its age has passed the soft
    /// TTL, i.e. whether the caller should refresh it.
    ///
    /// A full miss surfaces as [`StrataError::NotFound`], which callers
    /// treat the same way as a `true` staleness flag: fetch and re-set.
    pub async fn get_and_should_update<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> StrataResult<(T, bool)> {
        let decoded = self.lookup(key).await?;
        let value = decoded.decode_object()?;
        let age = decoded.age();
        self.monitor_hotness(age);
        Ok((value, age > self.soft_ttl))
    }

    /// Report whether `key` should be refreshed, without materializing the
    /// value. An absent key reports `true`: absence means "please refresh".
    pub async fn should_update(&self, key: &str) -> StrataResult<bool> {
        match self.lookup(key).await {
            Ok(decoded) => {
                if decoded.cached_object.is_none() {
                    return Err(StrataError::NilCache);
                }
                Ok(decoded.age() > self.soft_ttl)
            }
            Err(StrataError::NotFound) => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Store `value` under `key` in every layer, fastest first.
    ///
    /// The envelope is encoded once with `Time = now` and fanned out; a
    /// null value is rejected before any layer is touched. Per-layer
    /// failures are collected into one joined error naming each failing
    /// layer; the write is not atomic across layers.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> StrataResult<()> {
        let envelope_bytes = envelope::encode(value)?;

        let mut failures = Vec::new();
        for layer in &self.layers {
            if let Err(err) = layer.set(key, envelope_bytes.clone()).await {
                failures.push((layer.name().to_string(), err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StrataError::partial_failure("set", failures))
        }
    }

    /// Remove `key` from every layer. Absent keys are ignored; other
    /// failures are joined per layer.
    pub async fn delete(&self, key: &str) -> StrataResult<()> {
        let mut failures = Vec::new();
        for layer in &self.layers {
            if let Err(err) = layer.delete(key).await {
                if !err.is_absent() {
                    failures.push((layer.name().to_string(), err));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StrataError::partial_failure("delete", failures))
        }
    }

    /// Wipe the single layer whose name matches `target_layer`.
    pub async fn flush(&self, target_layer: &str) -> StrataResult<()> {
        for layer in &self.layers {
            if layer.name() == target_layer {
                return layer.clear().await;
            }
        }
        Err(StrataError::LayerNotFound(target_layer.to_string()))
    }

    /// Remaining hard lifetime of `key`: the first layer reporting a
    /// positive TTL wins, returned with its index. `None` when no layer
    /// tracks a lifetime for the key.
    pub async fn ttl(&self, key: &str) -> Option<(usize, Duration)> {
        for (index, layer) in self.layers.iter().enumerate() {
            let remaining = layer.ttl(key).await;
            if remaining > Duration::ZERO {
                return Some((index, remaining));
            }
        }
        None
    }

    /// Bucket the observed age relative to the soft TTL.
    fn monitor_hotness(&self, age: Duration) {
        let bucket = if age <= self.soft_ttl {
            "hot"
        } else if age <= self.soft_ttl * 2 {
            "warm"
        } else {
            "cold"
        };
        self.hit_counter
            .inc(&[&format!("{}-hotness", self.name), bucket]);
    }
}

impl std::fmt::Debug for CacheInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInstance")
            .field("name", &self.name)
            .field("layers", &self.layers.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("soft_ttl", &self.soft_ttl)
            .finish()
    }
}
