//! Cache layers: the uniform backend contract and its implementations.
//!
//! A layer stores opaque envelope bytes under string keys. The coordinator
//! walks an ordered stack of layers without knowing which kind of store it
//! is talking to:
//! - [`memory::BoundedMemoryLayer`] - sharded in-process store with a
//!   memory cap and FIFO eviction
//! - [`tiny::TinyLayer`] - unbounded concurrent map for tests and small
//!   fixed vocabularies
//! - [`remote::ShardedRemoteLayer`] - hash-sharded remote store with
//!   read/write role separation
//!
//! Compression is a per-layer property applied at the layer edge: `get`
//! returns decompressed envelope bytes and `set` seals plain envelope bytes
//! per the layer's flag, so the same envelope can move between layers that
//! disagree about compression.

pub mod memory;
pub mod remote;
pub mod tiny;

use crate::core::error::StrataResult;
use bytes::Bytes;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Future type returned by [`CacheLayer`] operations.
pub type LayerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Uniform contract every backend satisfies.
///
/// Implementations take ownership of the key before building their future,
/// honor cancellation by being droppable at any await point, and apply the
/// amnesia gate before touching their backend.
pub trait CacheLayer: Send + Sync {
    /// Fetch the envelope bytes stored under `key`.
    ///
    /// A miss surfaces as [`StrataError::KeyAbsent`]; the coordinator uses
    /// any error to continue its walk.
    ///
    /// [`StrataError::KeyAbsent`]: crate::core::error::StrataError::KeyAbsent
    fn get(&self, key: &str) -> LayerFuture<'_, StrataResult<Bytes>>;

    /// Store envelope bytes under `key` with the layer's hard TTL.
    fn set(&self, key: &str, envelope: Bytes) -> LayerFuture<'_, StrataResult<()>>;

    /// Remove `key`; an absent key is not an error.
    fn delete(&self, key: &str) -> LayerFuture<'_, StrataResult<()>>;

    /// Wipe the layer.
    fn clear(&self) -> LayerFuture<'_, StrataResult<()>>;

    /// Remaining lifetime of `key`; zero when unknown or not tracked.
    fn ttl(&self, key: &str) -> LayerFuture<'_, Duration>;

    /// The layer's configured name, unique within one coordinator.
    fn name(&self) -> &str;
}

/// Roll the amnesia dice for a read: fail with probability `chance`/100.
///
/// Draws from the process-wide PRNG; 0 never injects, 100 always does.
pub(crate) fn roll_amnesia(chance: u8) -> bool {
    chance > 0 && u32::from(chance) > rand::thread_rng().gen_range(0..100u32)
}

/// Whether a write-side operation must fail: only certain amnesia does.
pub(crate) fn write_amnesia(chance: u8) -> bool {
    chance == 100
}
