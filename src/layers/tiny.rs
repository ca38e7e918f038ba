//! Unbounded in-process layer backed by a concurrent map.
//!
//! No eviction, no TTL tracking. Meant for tests and small fixed
//! vocabularies where the working set is known to be bounded.

use crate::core::error::{StrataError, StrataResult};
use crate::envelope;
use crate::layers::{roll_amnesia, write_amnesia, CacheLayer, LayerFuture};
use bytes::Bytes;
use dashmap::DashMap;
use std::time::Duration;

/// Unbounded concurrent map layer.
#[derive(Debug)]
pub struct TinyLayer {
    name: String,
    amnesia_chance: u8,
    compression: bool,
    entries: DashMap<String, Bytes>,
}

impl TinyLayer {
    pub fn new(name: impl Into<String>, amnesia_chance: u8, compression: bool) -> Self {
        Self {
            name: name.into(),
            amnesia_chance,
            compression,
            entries: DashMap::new(),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheLayer for TinyLayer {
    fn get(&self, key: &str) -> LayerFuture<'_, StrataResult<Bytes>> {
        let key = key.to_string();
        Box::pin(async move {
            if roll_amnesia(self.amnesia_chance) {
                return Err(StrataError::Amnesia {
                    chance: self.amnesia_chance,
                });
            }
            let sealed = self
                .entries
                .get(&key)
                .map(|entry| entry.value().clone())
                .ok_or(StrataError::KeyAbsent)?;
            envelope::open(&sealed, self.compression)
        })
    }

    fn set(&self, key: &str, envelope_bytes: Bytes) -> LayerFuture<'_, StrataResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            if write_amnesia(self.amnesia_chance) {
                return Err(StrataError::Amnesia {
                    chance: self.amnesia_chance,
                });
            }
            let sealed = envelope::seal(envelope_bytes, self.compression)?;
            self.entries.insert(key, sealed);
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> LayerFuture<'_, StrataResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            if write_amnesia(self.amnesia_chance) {
                return Err(StrataError::Amnesia {
                    chance: self.amnesia_chance,
                });
            }
            self.entries.remove(&key);
            Ok(())
        })
    }

    fn clear(&self) -> LayerFuture<'_, StrataResult<()>> {
        Box::pin(async move {
            if write_amnesia(self.amnesia_chance) {
                return Err(StrataError::Amnesia {
                    chance: self.amnesia_chance,
                });
            }
            self.entries.clear();
            Ok(())
        })
    }

    fn ttl(&self, _key: &str) -> LayerFuture<'_, Duration> {
        // Lifetimes are not tracked per key.
        Box::pin(async { Duration::ZERO })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
