//! Hash-sharded remote layer with read/write role separation.
//!
//! Keys are routed to a shard with a stable 32-bit hash, so the routing is
//! a pure function of the key and the shard count and survives process
//! restarts. Reads go to a replica picked uniformly at random (the master
//! only when a shard has no replicas); writes always go to the master.
//!
//! `set` is set-if-absent on purpose: coordinator back-fills must never
//! overwrite a fresher value written by an application-level set, and
//! application sets inherit the same first-writer-wins contract within one
//! hard-TTL window.

use crate::core::error::{StrataError, StrataResult};
use crate::envelope;
use crate::layers::{roll_amnesia, write_amnesia, CacheLayer, LayerFuture};
use crate::observe::Timer;
use crate::remote::RemoteStore;
use bytes::Bytes;
use rand::Rng;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use twox_hash::XxHash32;

/// One shard: a master connection and its read replicas.
pub struct RemoteShard {
    pub master: Arc<dyn RemoteStore>,
    pub replicas: Vec<Arc<dyn RemoteStore>>,
}

impl RemoteShard {
    /// A shard with no replicas; reads fall back to the master.
    pub fn single(master: Arc<dyn RemoteStore>) -> Self {
        Self {
            master,
            replicas: Vec::new(),
        }
    }
}

/// Remote layer over one or more master/replica shards.
pub struct ShardedRemoteLayer {
    name: String,
    amnesia_chance: u8,
    compression: bool,
    entry_ttl: Duration,
    shards: Vec<RemoteShard>,
    timer: Arc<dyn Timer>,
}

impl ShardedRemoteLayer {
    pub fn new(
        name: impl Into<String>,
        shards: Vec<RemoteShard>,
        entry_ttl: Duration,
        amnesia_chance: u8,
        compression: bool,
        timer: Arc<dyn Timer>,
    ) -> StrataResult<Self> {
        let name = name.into();
        if shards.is_empty() {
            return Err(StrataError::InvalidConfig(format!(
                "remote layer {:?} has no shards",
                name
            )));
        }
        Ok(Self {
            name,
            amnesia_chance,
            compression,
            entry_ttl,
            shards,
            timer,
        })
    }

    /// Stable shard routing: a pure function of the key and the shard count.
    fn shard_index(&self, key: &str) -> usize {
        if self.shards.len() == 1 {
            return 0;
        }
        let mut hasher = XxHash32::with_seed(0);
        hasher.write(key.as_bytes());
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Replica for reads, uniformly at random; the master is reserved for
    /// writes unless the shard has no replicas at all.
    fn read_store(&self, key: &str) -> &Arc<dyn RemoteStore> {
        let shard = &self.shards[self.shard_index(key)];
        if shard.replicas.is_empty() {
            return &shard.master;
        }
        let pick = rand::thread_rng().gen_range(0..shard.replicas.len());
        &shard.replicas[pick]
    }

    fn write_store(&self, key: &str) -> &Arc<dyn RemoteStore> {
        &self.shards[self.shard_index(key)].master
    }

    fn amnesia(&self) -> StrataError {
        StrataError::Amnesia {
            chance: self.amnesia_chance,
        }
    }
}

impl CacheLayer for ShardedRemoteLayer {
    fn get(&self, key: &str) -> LayerFuture<'_, StrataResult<Bytes>> {
        let key = key.to_string();
        Box::pin(async move {
            if roll_amnesia(self.amnesia_chance) {
                return Err(self.amnesia());
            }
            let store = self.read_store(&key);
            let started = self.timer.start();
            match store.get(&key).await {
                Ok(Some(sealed)) => {
                    self.timer.done(started, &[&self.name, "get", "ok"]);
                    envelope::open(&sealed, self.compression)
                }
                Ok(None) => {
                    self.timer.done(started, &[&self.name, "get", "miss"]);
                    Err(StrataError::KeyAbsent)
                }
                Err(err) => {
                    self.timer.done(started, &[&self.name, "get", "error"]);
                    Err(err)
                }
            }
        })
    }

    fn set(&self, key: &str, envelope_bytes: Bytes) -> LayerFuture<'_, StrataResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            if write_amnesia(self.amnesia_chance) {
                return Err(self.amnesia());
            }
            let sealed = envelope::seal(envelope_bytes, self.compression)?;
            let store = self.write_store(&key);
            let started = self.timer.start();
            match store.set_nx(&key, sealed, self.entry_ttl).await {
                // An existing key means a fresher write already won; not an
                // error.
                Ok(_) => {
                    self.timer.done(started, &[&self.name, "set", "ok"]);
                    Ok(())
                }
                Err(err) => {
                    self.timer.done(started, &[&self.name, "set", "error"]);
                    Err(err)
                }
            }
        })
    }

    fn delete(&self, key: &str) -> LayerFuture<'_, StrataResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            if write_amnesia(self.amnesia_chance) {
                return Err(self.amnesia());
            }
            let store = self.write_store(&key);
            let started = self.timer.start();
            match store.del(&key).await {
                Ok(()) => {
                    self.timer.done(started, &[&self.name, "delete", "ok"]);
                    Ok(())
                }
                Err(err) => {
                    self.timer.done(started, &[&self.name, "delete", "error"]);
                    Err(err)
                }
            }
        })
    }

    fn clear(&self) -> LayerFuture<'_, StrataResult<()>> {
        Box::pin(async move {
            if write_amnesia(self.amnesia_chance) {
                return Err(self.amnesia());
            }
            // Flush every shard's master; the first failure wins and the
            // remaining shards are left as they are.
            for shard in &self.shards {
                let started = self.timer.start();
                match shard.master.flush_db().await {
                    Ok(()) => self.timer.done(started, &[&self.name, "clear", "ok"]),
                    Err(err) => {
                        self.timer.done(started, &[&self.name, "clear", "error"]);
                        return Err(err);
                    }
                }
            }
            Ok(())
        })
    }

    fn ttl(&self, key: &str) -> LayerFuture<'_, Duration> {
        let key = key.to_string();
        Box::pin(async move {
            let store = self.read_store(&key);
            let started = self.timer.start();
            match store.ttl(&key).await {
                Ok(Some(remaining)) => {
                    self.timer.done(started, &[&self.name, "ttl", "ok"]);
                    remaining
                }
                Ok(None) => {
                    self.timer.done(started, &[&self.name, "ttl", "miss"]);
                    Duration::ZERO
                }
                Err(_) => {
                    self.timer.done(started, &[&self.name, "ttl", "error"]);
                    Duration::ZERO
                }
            }
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
