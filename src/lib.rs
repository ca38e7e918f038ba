//! Strata - a multi-tier caching facade.
//!
//! Strata sits in front of application code and combines heterogeneous
//! cache backends (in-process byte stores, remote key-value stores) into a
//! single logical cache with read-through promotion, soft-TTL staleness
//! signaling, opt-in zlib payload compression, probabilistic fault
//! injection for testing, and pluggable metrics observation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        CacheRegistry                            │
//! │              (named instances built from TOML config)           │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        CacheInstance                            │
//! │    read walk + back-fill │ fan-out write/delete │ soft TTL      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     CacheLayer contract                         │
//! │   BoundedMemoryLayer  │  TinyLayer  │  ShardedRemoteLayer       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     RemoteStore connections                     │
//! │            RespStore (RESP2/TCP) │ InMemoryStore                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core::config`] - TOML configuration tree
//! - [`core::error`] - Error taxonomy and result alias
//! - [`envelope`] - Payload envelope codec (timestamp, JSON, zlib)
//! - [`observe`] - Timer and counter ports the core emits into
//! - [`layers`] - Layer contract and the three backends
//! - [`remote`] - Remote store connections
//! - [`instance`] - The multi-layer coordinator
//! - [`registry`] - Named registry of coordinators
//!
//! # Key Invariants
//!
//! - A stored entry is always a whole encoded envelope; readers never see
//!   a partially written value.
//! - The envelope timestamp is the ground truth for staleness, preserved
//!   across layers by back-fill.
//! - Remote writes are set-if-absent: the first writer wins within one
//!   hard-TTL window, so back-fills never clobber fresher values.
//! - Observation is best-effort and never changes results or errors.

// Core infrastructure
pub mod core;

// Payload envelope codec
pub mod envelope;

// Observation ports
pub mod observe;

// Layer contract and backends
pub mod layers;

// Remote store connections
pub mod remote;

// Coordinator and registry
pub mod instance;
pub mod registry;

// Re-exports for convenience
pub use crate::core::config::Config;
pub use crate::core::error::{StrataError, StrataResult};
pub use instance::CacheInstance;
pub use registry::CacheRegistry;

/// Join key parts into a single cache key with `;`.
pub fn make_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .map(|part| part.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(";")
}
