//! Bounded in-process byte store.
//!
//! Keys are sharded by hash into independent arenas so writers on different
//! keys rarely contend on the same lock. Each arena enforces its slice of
//! the layer's memory cap with FIFO eviction, and a background sweep task
//! removes expired entries at a fixed cadence when the layer has a TTL.
//! Entries are also checked lazily on `get`, so a stale entry is never
//! served between sweeps.

use crate::core::error::{StrataError, StrataResult};
use crate::envelope;
use crate::layers::{roll_amnesia, write_amnesia, CacheLayer, LayerFuture};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hasher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use twox_hash::XxHash32;

/// Arena count; high enough that shard contention is negligible.
const ARENA_COUNT: usize = 1024;

/// Cadence of the background expiry sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sharded in-process layer with a hard memory cap and FIFO eviction.
pub struct BoundedMemoryLayer {
    name: String,
    amnesia_chance: u8,
    compression: bool,
    entry_ttl: Duration,
    arenas: Arc<Vec<Mutex<Arena>>>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

struct Arena {
    entries: HashMap<String, StoredEntry>,
    /// Insertion order as `(key, seq)`; a replaced key leaves a stale pair
    /// behind that eviction and sweeps skip by sequence mismatch.
    queue: VecDeque<(String, u64)>,
    used_bytes: usize,
    /// Per-arena slice of the layer cap; 0 = unbounded.
    cap_bytes: usize,
    next_seq: u64,
}

struct StoredEntry {
    sealed: Bytes,
    stored_at: Instant,
    seq: u64,
}

impl BoundedMemoryLayer {
    /// Create the layer.
    ///
    /// `max_memory_bytes` = 0 disables the cap; `entry_ttl` = zero disables
    /// expiry. When a TTL is configured the constructor spawns the sweep
    /// task and therefore must run inside a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        max_memory_bytes: usize,
        entry_ttl: Duration,
        amnesia_chance: u8,
        compression: bool,
    ) -> Self {
        let cap_bytes = if max_memory_bytes == 0 {
            0
        } else {
            (max_memory_bytes / ARENA_COUNT).max(1)
        };
        let arenas = Arc::new(
            (0..ARENA_COUNT)
                .map(|_| {
                    Mutex::new(Arena {
                        entries: HashMap::new(),
                        queue: VecDeque::new(),
                        used_bytes: 0,
                        cap_bytes,
                        next_seq: 0,
                    })
                })
                .collect::<Vec<_>>(),
        );

        let sweeper = (entry_ttl > Duration::ZERO).then(|| {
            let arenas = Arc::clone(&arenas);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(SWEEP_INTERVAL);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    for arena in arenas.iter() {
                        arena.lock().sweep_expired(entry_ttl);
                    }
                }
            })
        });

        Self {
            name: name.into(),
            amnesia_chance,
            compression,
            entry_ttl,
            arenas,
            sweeper,
        }
    }

    fn arena_for(&self, key: &str) -> &Mutex<Arena> {
        let mut hasher = XxHash32::with_seed(0);
        hasher.write(key.as_bytes());
        &self.arenas[(hasher.finish() as usize) % ARENA_COUNT]
    }

    fn expired(&self, stored_at: Instant) -> bool {
        self.entry_ttl > Duration::ZERO && stored_at.elapsed() > self.entry_ttl
    }

    /// Total bytes currently held across all arenas.
    pub fn used_bytes(&self) -> usize {
        self.arenas.iter().map(|arena| arena.lock().used_bytes).sum()
    }

    /// Total number of stored entries.
    pub fn len(&self) -> usize {
        self.arenas.iter().map(|arena| arena.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for BoundedMemoryLayer {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl Arena {
    fn insert(&mut self, key: String, sealed: Bytes) {
        if let Some(previous) = self.entries.remove(&key) {
            self.used_bytes = self.used_bytes.saturating_sub(previous.sealed.len());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.used_bytes += sealed.len();
        self.queue.push_back((key.clone(), seq));
        self.entries.insert(
            key,
            StoredEntry {
                sealed,
                stored_at: Instant::now(),
                seq,
            },
        );
        self.evict_over_cap();
    }

    fn remove(&mut self, key: &str) {
        if let Some(previous) = self.entries.remove(key) {
            self.used_bytes = self.used_bytes.saturating_sub(previous.sealed.len());
        }
    }

    /// Evict oldest entries until under the cap. A single entry larger than
    /// the arena cap is admitted once everything older is gone.
    fn evict_over_cap(&mut self) {
        if self.cap_bytes == 0 {
            return;
        }
        while self.used_bytes > self.cap_bytes && self.entries.len() > 1 {
            let Some((key, seq)) = self.queue.pop_front() else {
                break;
            };
            let current = self
                .entries
                .get(&key)
                .is_some_and(|entry| entry.seq == seq);
            if current {
                self.remove(&key);
            }
            // A mismatch is a stale queue pair from a replaced key.
        }
    }

    fn sweep_expired(&mut self, ttl: Duration) {
        let now = Instant::now();
        let mut reclaimed = 0usize;
        self.entries.retain(|_, entry| {
            if now.duration_since(entry.stored_at) > ttl {
                reclaimed += entry.sealed.len();
                false
            } else {
                true
            }
        });
        self.used_bytes = self.used_bytes.saturating_sub(reclaimed);

        let entries = &self.entries;
        self.queue
            .retain(|(key, seq)| entries.get(key).is_some_and(|entry| entry.seq == *seq));
    }
}

impl CacheLayer for BoundedMemoryLayer {
    fn get(&self, key: &str) -> LayerFuture<'_, StrataResult<Bytes>> {
        let key = key.to_string();
        Box::pin(async move {
            if roll_amnesia(self.amnesia_chance) {
                return Err(StrataError::Amnesia {
                    chance: self.amnesia_chance,
                });
            }
            let mut arena = self.arena_for(&key).lock();
            let found = arena.entries.get(&key).map(|entry| {
                if self.expired(entry.stored_at) {
                    None
                } else {
                    Some(entry.sealed.clone())
                }
            });
            let sealed = match found {
                None => return Err(StrataError::KeyAbsent),
                Some(None) => {
                    // Expired but not yet swept; purge it on the way out.
                    arena.remove(&key);
                    return Err(StrataError::KeyAbsent);
                }
                Some(Some(sealed)) => sealed,
            };
            drop(arena);
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
            self.arena_for(&key).lock().insert(key, sealed);
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
            self.arena_for(&key).lock().remove(&key);
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
            for arena in self.arenas.iter() {
                let mut arena = arena.lock();
                arena.entries.clear();
                arena.queue.clear();
                arena.used_bytes = 0;
            }
            Ok(())
        })
    }

    fn ttl(&self, _key: &str) -> LayerFuture<'_, Duration> {
        // Lifetimes are a per-layer constant, not tracked per key.
        Box::pin(async { Duration::ZERO })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
