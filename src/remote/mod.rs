//! Remote key-value store connections.
//!
//! The sharded remote layer talks to its backends through the
//! [`RemoteStore`] contract so it never depends on a concrete wire client.
//! Two implementations ship:
//! - [`resp::RespStore`] - a minimal RESP2 client over TCP
//! - [`InMemoryStore`] - an in-process fake with real set-if-absent and
//!   TTL semantics, for tests and local development
//!
//! Connections are created eagerly when a layer is built and pinged in the
//! background; an unreachable endpoint is logged, never fatal.

pub mod resp;

pub use resp::RespStore;

use crate::core::error::StrataResult;
use bytes::Bytes;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Future type returned by [`RemoteStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Contract for one remote key-value connection (a master or a replica).
///
/// `set_nx` is set-if-absent on purpose: back-fill writes must never
/// overwrite a fresher value written by an application-level set within one
/// hard-TTL window.
pub trait RemoteStore: Send + Sync {
    /// Health probe.
    fn ping(&self) -> StoreFuture<'_, StrataResult<()>>;

    /// Fetch the stored bytes; `None` when the key is absent.
    fn get(&self, key: &str) -> StoreFuture<'_, StrataResult<Option<Bytes>>>;

    /// Store bytes only if the key does not already exist, with the given
    /// lifetime (zero = unbounded). Returns whether the write took effect.
    fn set_nx(&self, key: &str, value: Bytes, ttl: Duration)
        -> StoreFuture<'_, StrataResult<bool>>;

    /// Remove a key; absent keys are not an error.
    fn del(&self, key: &str) -> StoreFuture<'_, StrataResult<()>>;

    /// Wipe the logical database.
    fn flush_db(&self) -> StoreFuture<'_, StrataResult<()>>;

    /// Remaining lifetime of a key; `None` when absent or unbounded.
    fn ttl(&self, key: &str) -> StoreFuture<'_, StrataResult<Option<Duration>>>;

    /// The endpoint this connection points at, for logging.
    fn endpoint(&self) -> &str;
}

/// Ping a store in the background, logging failure.
pub fn spawn_ping(store: Arc<dyn RemoteStore>) {
    tokio::spawn(async move {
        if let Err(err) = store.ping().await {
            tracing::error!(
                endpoint = store.endpoint(),
                %err,
                "error pinging remote store"
            );
        }
    });
}

/// In-process [`RemoteStore`] with real set-if-absent and TTL expiry.
///
/// Backs tests and local development the way the original system was tested
/// against an in-process server.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store bytes unconditionally; test setup helper.
    pub fn insert_raw(&self, key: &str, bytes: Bytes) {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes,
                expires_at: None,
            },
        );
    }
}

impl RemoteStore for InMemoryStore {
    fn ping(&self) -> StoreFuture<'_, StrataResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn get(&self, key: &str) -> StoreFuture<'_, StrataResult<Option<Bytes>>> {
        let key = key.to_string();
        Box::pin(async move {
            if let Some(entry) = self.entries.get(&key) {
                if entry.live() {
                    return Ok(Some(entry.bytes.clone()));
                }
            } else {
                return Ok(None);
            }
            // The read guard is released before the expired entry is removed.
            self.entries.remove(&key);
            Ok(None)
        })
    }

    fn set_nx(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> StoreFuture<'_, StrataResult<bool>> {
        let key = key.to_string();
        Box::pin(async move {
            let expires_at = (ttl > Duration::ZERO).then(|| Instant::now() + ttl);
            let stored = StoredValue {
                bytes: value,
                expires_at,
            };
            match self.entries.entry(key) {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    if occupied.get().live() {
                        Ok(false)
                    } else {
                        occupied.insert(stored);
                        Ok(true)
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(stored);
                    Ok(true)
                }
            }
        })
    }

    fn del(&self, key: &str) -> StoreFuture<'_, StrataResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            self.entries.remove(&key);
            Ok(())
        })
    }

    fn flush_db(&self) -> StoreFuture<'_, StrataResult<()>> {
        Box::pin(async {
            self.entries.clear();
            Ok(())
        })
    }

    fn ttl(&self, key: &str) -> StoreFuture<'_, StrataResult<Option<Duration>>> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self.entries.get(&key).and_then(|entry| {
                entry
                    .expires_at
                    .map(|at| at.saturating_duration_since(Instant::now()))
                    .filter(|remaining| *remaining > Duration::ZERO)
            }))
        })
    }

    fn endpoint(&self) -> &str {
        "in-memory"
    }
}
